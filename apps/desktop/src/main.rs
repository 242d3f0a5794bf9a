mod config;

use std::{
    io::{self, BufRead, Write},
    sync::Arc,
};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use client_core::{
    AlwaysConfirm, ConfirmDestructive, Controller, HttpResource, MutationError, Severity,
    SortDirection, SortState, SyncState, ViewModel,
};
use shared::{
    domain::{format_fixed, FieldValue, Fields, RecordId},
    schema::{self, ResourceSchema},
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "desk", about = "Manage records of a REST resource from the terminal")]
struct Args {
    /// API base url, e.g. http://localhost:5000/api
    #[arg(long)]
    server_url: Option<String>,
    /// Resource preset (see `desk schemas`).
    #[arg(long)]
    resource: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show records, filtered and sorted.
    List {
        #[arg(long)]
        search: Option<String>,
        /// Category filter as `field=value`; repeatable.
        #[arg(long = "filter", value_parser = parse_pair)]
        filters: Vec<(String, String)>,
        #[arg(long, value_parser = parse_day)]
        from: Option<NaiveDate>,
        #[arg(long, value_parser = parse_day)]
        to: Option<NaiveDate>,
        #[arg(long)]
        sort: Option<String>,
        #[arg(long)]
        desc: bool,
    },
    Add {
        #[arg(long = "set", value_parser = parse_pair)]
        values: Vec<(String, String)>,
    },
    Update {
        id: String,
        #[arg(long = "set", value_parser = parse_pair, required = true)]
        values: Vec<(String, String)>,
    },
    Delete {
        id: String,
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },
    /// List the resource presets and their fields.
    Schemas,
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing key in `{raw}`"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn parse_day(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("expected YYYY-MM-DD, got `{raw}`: {err}"))
}

fn to_fields(values: Vec<(String, String)>) -> Fields {
    values
        .into_iter()
        .map(|(key, value)| (key, FieldValue::Text(value)))
        .collect()
}

/// Prompts on stdin; anything but `y`/`yes` declines.
struct StdinConfirm;

#[async_trait]
impl ConfirmDestructive for StdinConfirm {
    async fn confirm(&self, prompt: &str) -> bool {
        let prompt = prompt.to_string();
        tokio::task::spawn_blocking(move || {
            print!("{prompt} [y/N] ");
            if io::stdout().flush().is_err() {
                return false;
            }
            let mut answer = String::new();
            if io::stdin().lock().read_line(&mut answer).is_err() {
                return false;
            }
            matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
        })
        .await
        .unwrap_or(false)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = config::load_settings();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&settings.log_filter).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();
    let args = Args::parse();

    if let Command::Schemas = args.command {
        print_schemas();
        return Ok(());
    }

    let resource_name = args.resource.as_deref().unwrap_or(&settings.resource);
    let schema = schema::preset(resource_name).ok_or_else(|| {
        anyhow!(
            "unknown resource '{resource_name}' (expected one of: {})",
            schema::PRESET_NAMES.join(", ")
        )
    })?;
    let base = match &args.server_url {
        Some(raw) => config::normalize_base_url(raw),
        None => settings.base_url(),
    }?;
    info!(base_url = %base, resource = %schema.resource, "connecting");

    let remote = HttpResource::new(&base, &schema.resource, settings.request_timeout())
        .with_context(|| format!("failed to build client for '{}'", schema.resource))?;
    let controller = Controller::new(schema, Arc::new(remote), settings.controller_config());

    let mounted = controller.mount().await;
    let result = match mounted {
        Ok(outcome) => {
            debug!(count = outcome.loaded, skipped = outcome.skipped, "records loaded");
            run(&controller, args.command).await
        }
        Err(err) => Err(anyhow!(err)).with_context(|| {
            format!("failed to load {}", controller.schema().entity_plural)
        }),
    };
    print_notifications(&controller.view());
    controller.unmount();
    result
}

async fn run(controller: &Controller, command: Command) -> Result<()> {
    match command {
        Command::List {
            search,
            filters,
            from,
            to,
            sort,
            desc,
        } => {
            if let Some(term) = search {
                controller.set_search(term);
            }
            for (field, value) in filters {
                if !controller.schema().category_fields.contains(&field) {
                    bail!("'{field}' is not a filterable field");
                }
                controller.set_filter(field, value);
            }
            if from.is_some() || to.is_some() {
                controller.set_date_range(from, to);
            }
            if let Some(field) = sort {
                let direction = if desc {
                    SortDirection::Descending
                } else {
                    SortDirection::Ascending
                };
                controller.set_sort(SortState::new(field, direction));
            } else if desc {
                let mut current = controller.sort();
                current.direction = SortDirection::Descending;
                controller.set_sort(current);
            }
            print_view(controller.schema(), &controller.view());
        }
        Command::Add { values } => {
            let created = controller
                .create(to_fields(values))
                .await
                .map_err(explain)
                .context("add failed")?;
            println!("created {}", created.id);
        }
        Command::Update { id, values } => {
            let id = RecordId::new(id);
            controller
                .update(&id, to_fields(values))
                .await
                .map_err(explain)
                .with_context(|| format!("update of {id} failed"))?;
            println!("updated {id}");
        }
        Command::Delete { id, yes } => {
            let id = RecordId::new(id);
            let outcome = if yes {
                controller.remove(&id, &AlwaysConfirm).await
            } else {
                controller.remove(&id, &StdinConfirm).await
            };
            match outcome {
                Ok(()) => println!("deleted {id}"),
                Err(MutationError::Declined) => println!("kept {id}"),
                Err(err) => {
                    return Err(explain(err)).with_context(|| format!("delete of {id} failed"))
                }
            }
        }
        Command::Schemas => print_schemas(),
    }
    Ok(())
}

fn explain(err: MutationError) -> anyhow::Error {
    match err.validation_errors() {
        Some(errors) => anyhow!("invalid input: {errors}"),
        None => anyhow!(err),
    }
}

fn columns(schema: &ResourceSchema) -> Vec<&str> {
    schema
        .fields
        .iter()
        .map(|spec| spec.name.as_str())
        .chain(schema.derived.iter().map(|derived| derived.name.as_str()))
        .collect()
}

fn print_view(schema: &ResourceSchema, view: &ViewModel) {
    if view.total_records == 0 {
        println!("No {} yet.", schema.entity_plural);
        return;
    }
    if view.rows.is_empty() {
        println!("No {} match the current filters.", schema.entity_plural);
        return;
    }

    let columns = columns(schema);
    println!("id\t{}", columns.join("\t"));
    for row in &view.rows {
        let cells: Vec<String> = columns
            .iter()
            .map(|name| match row.value(name) {
                FieldValue::Number(n) if schema.derived_field(name).is_some() => {
                    format_fixed(n, 2)
                }
                value => value.display(),
            })
            .collect();
        let marker = if row.sync == SyncState::Synced { "" } else { " *" };
        println!("{}{marker}\t{}", row.record.id, cells.join("\t"));
    }

    let summary = &view.summary;
    println!();
    println!(
        "{} of {} shown, {} this month",
        summary.count, view.total_records, summary.this_month
    );
    if schema.amount_field.is_some() {
        println!("total: {}", format_fixed(summary.total_amount, 2));
    }
    for (status, count) in &summary.by_status {
        println!("{status}: {count}");
    }
}

fn print_notifications(view: &ViewModel) {
    for note in &view.notifications {
        let tag = match note.severity {
            Severity::Success => "ok",
            Severity::Error => "error",
        };
        eprintln!("[{tag}] {}", note.message);
    }
}

fn print_schemas() {
    for name in schema::PRESET_NAMES {
        let Some(schema) = schema::preset(name) else {
            continue;
        };
        println!("{name} (/{})", schema.resource);
        for spec in &schema.fields {
            let required = if spec.is_required() { " (required)" } else { "" };
            println!("  {}: {}{required}", spec.name, spec.label);
        }
        for derived in &schema.derived {
            println!("  {}: {} (computed)", derived.name, derived.label);
        }
    }
}
