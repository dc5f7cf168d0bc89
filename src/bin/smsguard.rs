//! Command-line client for an SMS Guard server

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use smsguard::classifier::ensemble::Label;
use smsguard::client::{ImageFile, SessionStore, SmsGuardClient};
use smsguard::models::{ApiResponse, LabelFilter, PredictionQuery, ProfileUpdate};

#[derive(Parser)]
#[command(name = "smsguard")]
#[command(about = "Check SMS messages for spam against an SMS Guard server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Server root URL
    #[arg(short, long, default_value = "http://localhost:5000")]
    server: String,

    /// Session file (defaults to the user data directory)
    #[arg(long, value_name = "FILE")]
    session: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the server is up
    Health,
    /// Log in and store the session
    Login {
        username_or_email: String,
        password: String,
    },
    /// Create an account and log in
    Register {
        username: String,
        email: String,
        password: String,
        /// Defaults to the password
        #[arg(long)]
        confirm: Option<String>,
    },
    /// Revoke the token and forget the session
    Logout,
    /// Show the logged in user
    Whoami,
    /// Request a password reset link
    ForgotPassword { email: String },
    /// Set a new password with a reset token
    ResetPassword { token: String, password: String },
    /// Classify a message
    Predict { message: String },
    /// Explain which words drove a classification
    Explain {
        message: String,
        #[arg(short, long)]
        num_features: Option<usize>,
    },
    /// Report the true label of a prediction
    Feedback { prediction_id: String, label: String },
    /// Model details and validation metrics
    Model,
    /// Dashboard statistics
    Stats,
    /// Prediction history
    History {
        #[arg(long)]
        page: Option<i64>,
        #[arg(long)]
        per_page: Option<i64>,
        /// all, spam or ham
        #[arg(long, default_value = "all")]
        filter: String,
        #[arg(long)]
        search: Option<String>,
    },
    /// Write the history as CSV
    Export {
        #[arg(short, long, default_value = "sms_predictions.csv")]
        output: PathBuf,
        #[arg(long, default_value = "all")]
        filter: String,
        #[arg(long)]
        search: Option<String>,
    },
    /// Update profile fields and optionally upload an image
    Profile {
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        bio: Option<String>,
        #[arg(long)]
        theme: Option<String>,
        #[arg(long, value_name = "FILE")]
        image: Option<PathBuf>,
    },
    /// Change the account password
    ChangePassword { current: String, new: String },
    /// Delete the account and all of its history
    DeleteAccount,
    /// Talk to the assistant about a message
    Chat {
        message: String,
        /// Skip classification of the message
        #[arg(long)]
        no_analyze: bool,
    },
    /// Show the conversation with the assistant
    Conversation,
    /// Forget the conversation with the assistant
    ClearChat,
}

fn parse_filter(raw: &str) -> Result<LabelFilter> {
    match raw.to_ascii_lowercase().as_str() {
        "all" => Ok(LabelFilter::All),
        "spam" => Ok(LabelFilter::Spam),
        "ham" => Ok(LabelFilter::Ham),
        other => bail!("unknown filter '{}', expected all, spam or ham", other),
    }
}

/// Print `data` (or the message) of a successful answer; fail otherwise.
fn report<T: Serialize>(response: ApiResponse<T>) -> Result<()> {
    if !response.success {
        bail!(response.error.unwrap_or_else(|| "Request failed".to_string()));
    }
    if let Some(data) = response.data {
        println!("{}", serde_json::to_string_pretty(&data)?);
    }
    if let Some(message) = response.message {
        println!("{}", message);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(fmt::layer().with_target(false).compact())
        .init();

    let cli = Cli::parse();
    let session = match cli.session {
        Some(path) => SessionStore::new(path),
        None => SessionStore::default_location(),
    };
    let client = SmsGuardClient::new(cli.server, session)?;

    match cli.command {
        Commands::Health => report(client.health().await),
        Commands::Login {
            username_or_email,
            password,
        } => {
            let response = client.login(&username_or_email, &password).await;
            if let Some(auth) = &response.data {
                println!("Logged in as {}", auth.user.username);
            }
            report(response.map_data(|_| ()))
        }
        Commands::Register {
            username,
            email,
            password,
            confirm,
        } => {
            let confirm = confirm.unwrap_or_else(|| password.clone());
            let response = client.register(&username, &email, &password, &confirm).await;
            if let Some(auth) = &response.data {
                println!("Registered and logged in as {}", auth.user.username);
            }
            report(response.map_data(|_| ()))
        }
        Commands::Logout => report(client.logout().await),
        Commands::Whoami => report(client.current_user().await),
        Commands::ForgotPassword { email } => report(client.forgot_password(&email).await),
        Commands::ResetPassword { token, password } => {
            report(client.reset_password(&token, &password, None).await)
        }
        Commands::Predict { message } => {
            let response = client.predict(&message).await;
            if let Some(result) = &response.data {
                let weighted = &result.weighted_result;
                println!(
                    "{} ({:.1}% confidence, {:?})",
                    weighted.prediction.as_str().to_uppercase(),
                    weighted.confidence * 100.0,
                    result.confidence_level
                );
                println!("{}", result.suggestion);
                println!("prediction id: {}", result.id);
                return Ok(());
            }
            report(response)
        }
        Commands::Explain {
            message,
            num_features,
        } => report(client.explain(&message, num_features).await),
        Commands::Feedback {
            prediction_id,
            label,
        } => {
            let Some(label) = Label::parse(&label.to_ascii_lowercase()) else {
                bail!("label must be spam or ham");
            };
            report(client.submit_feedback(&prediction_id, label).await)
        }
        Commands::Model => {
            report(client.model_info().await)?;
            report(client.model_metrics().await)
        }
        Commands::Stats => report(client.user_stats().await),
        Commands::History {
            page,
            per_page,
            filter,
            search,
        } => {
            let query = PredictionQuery {
                page,
                per_page,
                filter: parse_filter(&filter)?,
                search,
            };
            report(client.predictions(&query).await)
        }
        Commands::Export {
            output,
            filter,
            search,
        } => {
            let query = PredictionQuery {
                filter: parse_filter(&filter)?,
                search,
                ..Default::default()
            };
            let response = client.export_predictions(&query).await;
            let Some(csv) = response.data else {
                bail!(response.error.unwrap_or_else(|| "Export failed".to_string()));
            };
            std::fs::write(&output, csv)
                .with_context(|| format!("writing {}", output.display()))?;
            println!("Saved {}", output.display());
            Ok(())
        }
        Commands::Profile {
            username,
            email,
            bio,
            theme,
            image,
        } => {
            let image = match image {
                Some(path) => Some(ImageFile {
                    file_name: path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default(),
                    bytes: std::fs::read(&path)
                        .with_context(|| format!("reading {}", path.display()))?,
                }),
                None => None,
            };
            let update = ProfileUpdate {
                username,
                email,
                bio,
                theme,
            };
            report(client.update_profile(&update, image).await)
        }
        Commands::ChangePassword { current, new } => {
            report(client.change_password(&current, &new, None).await)
        }
        Commands::DeleteAccount => report(client.delete_account().await),
        Commands::Chat {
            message,
            no_analyze,
        } => {
            let response = client.chat(&message, !no_analyze).await;
            if let Some(reply) = &response.data {
                println!("{}", reply.bot_response);
                return Ok(());
            }
            report(response)
        }
        Commands::Conversation => report(client.conversation().await),
        Commands::ClearChat => report(client.clear_conversation().await),
    }
}
