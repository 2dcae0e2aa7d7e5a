use clap::{Args, Parser, Subcommand};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use pushcast::adapters::{HttpPushSender, LocalTimeProvider, MongoSubscriptionStore};
use pushcast::config::{self, ConfigError, DbConfig, DeliveryOptions, NotificationContent, VapidClaims};
use pushcast::ports::{SubscriptionStore, TimeProvider};
use pushcast::push::{
    self, DispatchLimits, Dispatcher, RunReport, VapidCredentials, WebPushEncoder,
};
use pushcast::types::push::NotificationRequest;
use pushcast::types::store::InvalidRecordPolicy;

const EXIT_OK: u8 = 0;
const EXIT_STORE: u8 = 1;
const EXIT_CONFIG: u8 = 2;

pub(crate) async fn run(time: LocalTimeProvider) -> u8 {
    let cli = Cli::parse();
    match cli.command {
        Some(Command::Keygen) => run_keygen(),
        None => execute_send(&cli.send, MongoSubscriptionStore::new, time).await,
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "pushcast",
    version,
    about = "Send a Web Push notification to every stored subscription",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
    #[command(flatten)]
    send: SendArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a fresh VAPID key pair
    Keygen,
}

#[derive(Args, Debug, Clone)]
struct SendArgs {
    #[arg(long, short = 't', default_value = "Test")]
    title: String,
    #[arg(long, short = 'm', default_value = "This is a test")]
    message: String,
    /// Seconds the push service may hold the message
    #[arg(long, short = 'l', default_value_t = config::DEFAULT_TTL)]
    ttl: u32,
    #[arg(long, short = 'u', default_value = config::DEFAULT_URGENCY)]
    urgency: String,
    #[arg(long, short = 'r')]
    require_interaction: bool,
    #[arg(long, short = 'p', default_value = "push_data/push_data.json")]
    push_data_file: PathBuf,
    #[arg(long, env = "PUSHCAST_DB_INFO", default_value = "secrets/db_info.json")]
    db_info: PathBuf,
    #[arg(long, env = "PUSHCAST_CLAIMS", default_value = "secrets/claims.json")]
    claims: PathBuf,
    #[arg(
        long,
        env = "PUSHCAST_PRIVATE_KEY",
        default_value = "secrets/private_key.pem"
    )]
    private_key: PathBuf,
    /// Deliveries in flight at once
    #[arg(long, default_value = "4")]
    concurrency: NonZeroUsize,
    /// Seconds before a single delivery is abandoned
    #[arg(long, default_value_t = push::DEFAULT_SEND_TIMEOUT.as_secs())]
    send_timeout: u64,
    /// Report malformed stored subscriptions instead of aborting
    #[arg(long)]
    skip_invalid: bool,
}

impl SendArgs {
    fn request(&self) -> NotificationRequest {
        NotificationRequest {
            title: self.title.clone(),
            message: self.message.clone(),
            options: DeliveryOptions {
                ttl: self.ttl,
                urgency: self.urgency.clone(),
                require_interaction: self.require_interaction,
            },
        }
    }

    fn limits(&self) -> DispatchLimits {
        DispatchLimits {
            concurrency: self.concurrency,
            send_timeout: Duration::from_secs(self.send_timeout),
        }
    }

    fn record_policy(&self) -> InvalidRecordPolicy {
        if self.skip_invalid {
            InvalidRecordPolicy::Skip
        } else {
            InvalidRecordPolicy::Abort
        }
    }
}

struct SendInputs {
    content: NotificationContent,
    claims: VapidClaims,
    db: DbConfig,
}

enum InputError {
    MissingPushData(PathBuf),
    Config(ConfigError),
}

impl From<ConfigError> for InputError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

fn load_inputs(args: &SendArgs) -> Result<SendInputs, InputError> {
    if !args.push_data_file.is_file() {
        return Err(InputError::MissingPushData(args.push_data_file.clone()));
    }
    Ok(SendInputs {
        content: config::load_json(&args.push_data_file)?,
        claims: config::load_json(&args.claims)?,
        db: config::load_json(&args.db_info)?,
    })
}

async fn execute_send<St, F, T>(args: &SendArgs, open_store: F, time: T) -> u8
where
    St: SubscriptionStore,
    F: FnOnce(DbConfig, InvalidRecordPolicy) -> St,
    T: TimeProvider,
{
    let inputs = match load_inputs(args) {
        Ok(inputs) => inputs,
        Err(InputError::MissingPushData(path)) => {
            eprintln!(
                "error: push data file {} does not exist; pass --push-data-file",
                path.display()
            );
            return EXIT_CONFIG;
        }
        Err(InputError::Config(err)) => {
            eprintln!("error: {err}");
            return EXIT_CONFIG;
        }
    };
    let sender = match HttpPushSender::new() {
        Ok(sender) => sender,
        Err(err) => {
            eprintln!("error: failed to build HTTP client: {err}");
            return EXIT_CONFIG;
        }
    };

    let credentials = VapidCredentials {
        key: push::load_vapid_key(&args.private_key),
        claims: inputs.claims,
    };
    let encoder = WebPushEncoder::new(credentials, inputs.content);
    let dispatcher = Dispatcher::new(time, encoder, sender, args.limits());
    let store = open_store(inputs.db, args.record_policy());
    let request = args.request();

    match push::notify_all(&store, &dispatcher, &request).await {
        Ok(report) => {
            print_report(args, &request, &report);
            EXIT_OK
        }
        Err(err) => {
            eprintln!("error: {err}");
            EXIT_STORE
        }
    }
}

fn print_report(args: &SendArgs, request: &NotificationRequest, report: &RunReport) {
    println!("MongoDB Version: {}", report.server_version);
    println!("Current Time: {}", report.delivery.timestamp);
    println!();
    println!("Title: {}", request.title);
    println!("Message: {}", request.message);
    println!("Time to Live: {}", request.options.ttl);
    println!("Urgency: {}", request.options.urgency);
    println!("Require Interaction: {}", request.options.require_interaction);
    println!("Push Data File: {}", args.push_data_file.display());
    println!();
    for line in outcome_lines(report) {
        println!("{line}");
    }
    println!();
    println!("{}", summary_line(report));
}

fn outcome_lines(report: &RunReport) -> Vec<String> {
    let deliveries = report.delivery.outcomes.iter().map(|outcome| {
        let mark = if outcome.status.is_delivered() {
            "ok"
        } else {
            "FAILED"
        };
        format!("[{mark}] {outcome}")
    });
    let skipped = report
        .rejected
        .iter()
        .map(|record| format!("[skipped] {record}"));
    deliveries.chain(skipped).collect()
}

fn summary_line(report: &RunReport) -> String {
    let mut line = format!(
        "delivered {}, failed {}",
        report.delivery.delivered(),
        report.delivery.failed()
    );
    if !report.rejected.is_empty() {
        line.push_str(&format!(", skipped {} invalid", report.rejected.len()));
    }
    line
}

fn run_keygen() -> u8 {
    let keys = match push::generate_vapid_keys() {
        Ok(keys) => keys,
        Err(err) => {
            eprintln!("failed to generate VAPID keys: {err}");
            return 1;
        }
    };

    println!("VAPID key pair generated.");
    println!();
    println!("Private key (save as secrets/private_key.pem):");
    println!("{}", keys.private_key_pem.trim_end());
    println!();
    println!("Public key (applicationServerKey for browser subscriptions):");
    println!("{}", keys.public_key);
    0
}
