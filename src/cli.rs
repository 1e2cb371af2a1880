use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::codoon_client::CodoonClient;
use crate::config::Config;
use crate::sync::SyncJob;
use crate::upload::{GarminTarget, StravaTarget, UploadJob};

#[derive(Parser)]
#[command(name = "runsync", about = "Sync Codoon activities to GPX and upload them")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in with mobile number and password and print the token pair
    Login { mobile: String, password: String },
    /// Export all activities that are not yet in the GPX directory
    Sync {
        /// Mobile number, or a refresh token with --from-refresh-token
        mobile_or_token: String,
        /// Password, or a user id with --from-refresh-token
        password_or_user_id: String,
        /// Authenticate with a previously captured refresh token
        #[arg(long)]
        from_refresh_token: bool,
    },
    /// Upload new GPX files to a destination platform
    Upload {
        #[command(subcommand)]
        target: UploadCommand,
    },
}

#[derive(Subcommand)]
enum UploadCommand {
    /// Upload to Strava, then archive the uploaded files
    Strava {
        client_id: String,
        client_secret: String,
        refresh_token: String,
        /// Upload everything, ignoring the destination watermark
        #[arg(long)]
        all: bool,
    },
    /// Upload to Garmin Connect
    Garmin {
        /// Pre-issued OAuth2 bearer token
        token: String,
        /// Use the garmin.cn deployment
        #[arg(long)]
        is_cn: bool,
        /// Upload everything, ignoring the destination watermark
        #[arg(long)]
        all: bool,
    },
}

pub async fn run() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Cli::parse();
    let config = Config::from_env()?;

    match args.command {
        Commands::Login { mobile, password } => {
            let client = CodoonClient::login(&mobile, &password).await?;
            println!(
                "your refresh_token and user_id are {} {}",
                client.refresh_token, client.user_id
            );
        }
        Commands::Sync {
            mobile_or_token,
            password_or_user_id,
            from_refresh_token,
        } => {
            let client = if from_refresh_token {
                CodoonClient::from_refresh_token(&mobile_or_token, &password_or_user_id).await?
            } else {
                let client = CodoonClient::login(&mobile_or_token, &password_or_user_id).await?;
                println!(
                    "your refresh_token and user_id are {} {}",
                    client.refresh_token, client.user_id
                );
                client
            };
            SyncJob::new(client, &config)?.sync_all().await?;
        }
        Commands::Upload { target } => match target {
            UploadCommand::Strava {
                client_id,
                client_secret,
                refresh_token,
                all,
            } => {
                let target = StravaTarget::connect(&client_id, &client_secret, &refresh_token).await?;
                UploadJob::new(&target, &config.gpx_dir, all, true)
                    .sync_uploads()
                    .await?;
            }
            UploadCommand::Garmin { token, is_cn, all } => {
                let target = GarminTarget::new(token, is_cn);
                UploadJob::new(&target, &config.gpx_dir, all, false)
                    .sync_uploads()
                    .await?;
            }
        },
    }
    Ok(())
}
