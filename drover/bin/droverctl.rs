use clap::{Parser, Subcommand};

use drover_control::{
    AccountingCommand, ControlClient, JobCommand, PressureCommand, RequestCommand, ResponsePayload,
    SystemCommand,
};

/// Operator CLI for a running drover instance.
#[derive(Debug, Parser)]
#[command(name = "droverctl", version, about)]
struct Args {
    /// Control socket path.
    #[arg(short, long, default_value = drover_control::DEFAULT_CONTROL_SOCKET)]
    socket: String,

    /// Bearer token, when the server has auth enabled.
    #[arg(short, long)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a job for a campaign.
    Start {
        campaign_id: String,
        /// Admit a second active job alongside an existing one.
        #[arg(long)]
        force: bool,
    },
    /// Pause the campaign's active job.
    Pause { campaign_id: String },
    /// Resume the campaign's paused job.
    Resume { campaign_id: String },
    /// Stop the campaign's active job.
    Stop { campaign_id: String },
    /// Job status, for one campaign or all.
    Status { campaign_id: Option<String> },
    /// Ask the accounting poller to pull immediately.
    PullNow,
    /// Accounting cursor and bridge status.
    Accounting,
    /// Latest pressure snapshot and domain classifications.
    Pressure,
    /// Liveness check.
    Ping,
}

impl Command {
    fn into_request(self) -> RequestCommand {
        match self {
            Self::Start { campaign_id, force } => {
                RequestCommand::Job(JobCommand::Start { campaign_id, force })
            }
            Self::Pause { campaign_id } => RequestCommand::Job(JobCommand::Pause { campaign_id }),
            Self::Resume { campaign_id } => RequestCommand::Job(JobCommand::Resume { campaign_id }),
            Self::Stop { campaign_id } => RequestCommand::Job(JobCommand::Stop { campaign_id }),
            Self::Status { campaign_id } => RequestCommand::Job(JobCommand::Status { campaign_id }),
            Self::PullNow => RequestCommand::Accounting(AccountingCommand::PullNow),
            Self::Accounting => RequestCommand::Accounting(AccountingCommand::Status),
            Self::Pressure => RequestCommand::Pressure(PressureCommand::Status),
            Self::Ping => RequestCommand::System(SystemCommand::Ping),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let client = ControlClient::new(args.socket, args.token);

    let response = client.send(args.command.into_request()).await?;
    match response.payload {
        ResponsePayload::Ok(message) => println!("{message}"),
        ResponsePayload::Error(message) => {
            eprintln!("error: {message}");
            std::process::exit(1);
        }
        ResponsePayload::Jobs(views) => println!("{}", serde_json::to_string_pretty(&views)?),
        ResponsePayload::Accounting(view) => println!("{}", serde_json::to_string_pretty(&view)?),
        ResponsePayload::Pressure(view) => println!("{}", serde_json::to_string_pretty(&view)?),
    }
    Ok(())
}
