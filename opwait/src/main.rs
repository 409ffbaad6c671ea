//! opwait: operator tool for waiting on cloud operations.
//!
//! Each subcommand runs one reconciliation against the remote API and exits
//! with status 0 once it has taken effect:
//! - `operation`: poll an operation handle until it is done
//! - `resource-deletion`: re-read a resource until it is gone
//! - `locate`: find a sub-resource in a paginated listing
//! - `resting`: poll a resource until it settles in a declared state
//!
//! Ctrl-C cancels the wait. Timeouts exit with status 2, caller
//! cancellation with 130, every other failure with 1.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use opwait::{
    BackoffPolicy, Confirm, DeletionTarget, DeletionWatcher, HttpTransport, HttpTransportConfig,
    ItemMatcher, Listing, MatchRule, MutationResult, OperationHandle, OperationKind,
    OperationReconciler, PaginatedLocator, PollError, ReconcilerConfig, RestingStates, Scope,
};

/// Wait for asynchronous cloud operations to take effect
#[derive(Parser, Debug)]
#[command(name = "opwait", version, about)]
struct Args {
    /// API root operation URLs are derived from
    #[arg(
        long,
        env = "OPWAIT_BASE_URL",
        default_value = "https://compute.googleapis.com/compute/v1/"
    )]
    base_url: String,

    /// Project for compute-style operations
    #[arg(long, env = "OPWAIT_PROJECT")]
    project: Option<String>,

    /// Bearer token sent with every request
    #[arg(long, env = "OPWAIT_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Delay after the first pending check, in seconds
    #[arg(long, default_value = "1")]
    poll_interval: u64,

    /// Upper bound for the delay between checks, in seconds
    #[arg(long, default_value = "10")]
    max_interval: u64,

    /// Give up after this many seconds
    #[arg(long, default_value = "1200")]
    timeout: u64,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "30")]
    request_timeout: u64,

    /// Page size for listing reads
    #[arg(long, default_value = "300")]
    page_size: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Wait for an operation handle to finish
    Operation {
        /// Operation name (compute) or full resource name (long-running)
        name: String,

        #[arg(long, value_enum, default_value = "compute")]
        kind: Kind,

        #[arg(long, conflicts_with = "region")]
        zone: Option<String>,

        #[arg(long)]
        region: Option<String>,

        /// Resource the operation acts on, used in log lines
        #[arg(long)]
        target: Option<String>,
    },

    /// Wait until a resource is gone
    ResourceDeletion {
        /// Resource URL to re-read; 404 means deleted
        #[arg(long, required_unless_present = "list_url")]
        url: Option<String>,

        #[command(flatten)]
        listing: ListingArgs,

        /// Dotted path of the state field
        #[arg(long, default_value = "state")]
        state_field: String,

        /// States meaning "still being deleted" (repeatable)
        #[arg(long = "deleting-state", default_value = "DELETING")]
        deleting_states: Vec<String>,
    },

    /// Find a sub-resource in a paginated listing
    Locate {
        #[command(flatten)]
        listing: ListingArgs,
    },

    /// Wait until a resource settles in a ready or error state
    Resting {
        /// Resource URL to re-read
        #[arg(long)]
        url: String,

        /// Dotted path of the state field
        #[arg(long, default_value = "status")]
        state_field: String,

        /// Ready states (repeatable)
        #[arg(long = "ready", required = true)]
        ready: Vec<String>,

        /// Error states (repeatable)
        #[arg(long = "error")]
        error: Vec<String>,
    },
}

#[derive(clap::Args, Debug)]
struct ListingArgs {
    /// Listing URL to search instead of reading the resource directly
    #[arg(long)]
    list_url: Option<String>,

    /// Field the listing returns its items under
    #[arg(long, requires = "list_url")]
    items_field: Option<String>,

    /// Name (or trailing name segment) of the item to find
    #[arg(long, requires = "list_url")]
    item_name: Option<String>,

    /// Dotted path of the field compared against the item name
    #[arg(long, default_value = "name")]
    match_field: String,

    /// Compare the whole field instead of its trailing segment
    #[arg(long)]
    exact: bool,
}

impl ListingArgs {
    fn resolve(&self) -> Result<Option<(Listing, ItemMatcher)>> {
        let Some(url) = &self.list_url else {
            return Ok(None);
        };
        let items_field = self
            .items_field
            .clone()
            .context("--items-field is required with --list-url")?;
        let name = self
            .item_name
            .clone()
            .context("--item-name is required with --list-url")?;
        let rule = if self.exact {
            MatchRule::Exact(name)
        } else {
            MatchRule::PathSuffix(name)
        };
        Ok(Some((
            Listing::new(url.clone(), items_field),
            ItemMatcher::new(self.match_field.clone(), rule),
        )))
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Kind {
    Compute,
    LongRunning,
}

impl From<Kind> for OperationKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Compute => OperationKind::Compute,
            Kind::LongRunning => OperationKind::LongRunning,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "opwait=info,reqwest=warn,hyper=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling wait");
            on_signal.cancel();
        }
    });

    match run(args, &cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = match e.downcast_ref::<PollError>() {
                Some(PollError::Timeout { .. }) => {
                    error!("Timed out: {:#}", e);
                    2
                }
                Some(PollError::Cancelled { .. }) => {
                    error!("Cancelled: {:#}", e);
                    130
                }
                _ => {
                    error!("Failed: {:#}", e);
                    1
                }
            };
            ExitCode::from(code)
        }
    }
}

async fn run(args: Args, cancel: &CancellationToken) -> Result<()> {
    let transport = HttpTransport::new(HttpTransportConfig {
        request_timeout: Duration::from_secs(args.request_timeout),
        access_token: args.access_token,
        ..Default::default()
    })
    .context("Failed to build HTTP client")?;

    let mut config = ReconcilerConfig::default()
        .with_base_url(args.base_url)
        .with_backoff(BackoffPolicy {
            initial: Duration::from_secs(args.poll_interval),
            max: Duration::from_secs(args.max_interval.max(args.poll_interval)),
            multiplier: 2.0,
        })
        .with_page_size(args.page_size);
    if let Some(project) = args.project {
        config = config.with_project(project);
    }
    let budget = Duration::from_secs(args.timeout);

    info!("Base URL: {}", config.base_url);

    match args.command {
        Command::Operation {
            name,
            kind,
            zone,
            region,
            target,
        } => {
            let scope = match (zone, region) {
                (Some(zone), _) => Scope::Zone(zone),
                (None, Some(region)) => Scope::Region(region),
                (None, None) => Scope::Global,
            };
            let target = target.unwrap_or_else(|| name.clone());
            let description = format!("operation {}", name);
            let handle = OperationHandle::new(kind.into(), name, scope, target, description)?;

            let response = OperationReconciler::new(&transport, &config)
                .reconcile(MutationResult::pending(handle), budget, cancel)
                .await?;
            if let Some(response) = response {
                print_json(&response)?;
            }
        }
        Command::ResourceDeletion {
            url,
            listing,
            state_field,
            deleting_states,
        } => {
            let target = match (listing.resolve()?, url) {
                (Some((listing, matcher)), _) => {
                    let description = format!("{} in {}", listing.items_field, listing.url);
                    DeletionTarget::via_listing(listing, matcher, description)
                }
                (None, Some(url)) => DeletionTarget::direct(url.clone(), url),
                (None, None) => anyhow::bail!("either --url or --list-url is required"),
            };
            let target = target
                .with_state_field(state_field)
                .with_deleting_states(deleting_states);

            DeletionWatcher::new(&transport, &config)
                .wait(target, budget, cancel)
                .await?;
        }
        Command::Locate { listing } => {
            let (listing, matcher) = listing
                .resolve()?
                .context("--list-url is required for locate")?;
            let item = PaginatedLocator::new(&transport, listing, matcher, config.page_size)
                .locate_required()
                .await?;
            print_json(&item)?;
        }
        Command::Resting {
            url,
            state_field,
            ready,
            error,
        } => {
            let states = ready
                .into_iter()
                .fold(RestingStates::new(), RestingStates::ready);
            let states = error.into_iter().fold(states, RestingStates::error);

            let doc = OperationReconciler::new(&transport, &config)
                .await_resting_state(
                    Confirm::DirectRead(url.clone()),
                    states,
                    &state_field,
                    &url,
                    budget,
                    cancel,
                )
                .await?;
            print_json(&doc)?;
        }
    }

    Ok(())
}

fn print_json(doc: &Value) -> Result<()> {
    let out = serde_json::to_string_pretty(doc).context("Failed to encode output")?;
    println!("{}", out);
    Ok(())
}
