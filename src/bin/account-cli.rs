use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "account-cli")]
#[command(about = "Command-line client for the account API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080", env = "ACCOUNT_API_URL")]
    url: String,

    /// Access token for authenticated commands
    #[arg(short, long, env = "ACCOUNT_API_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account
    Register {
        email: String,
        password: String,
        #[arg(long, default_value = "")]
        full_name: String,
    },
    /// Sign in and print the credential pair
    Login { email: String, password: String },
    /// Exchange a refresh token for a new pair
    Refresh { refresh_token: String },
    /// Revoke every session of the current user
    Logout,
    /// Show the current user's profile
    Me,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let api = format!("{}/api/v1", cli.url.trim_end_matches('/'));

    let mut headers = HeaderMap::new();
    if let Some(token) = &cli.token {
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))?,
        );
    }

    let res = match cli.command {
        Commands::Register {
            email,
            password,
            full_name,
        } => {
            client
                .post(format!("{api}/auth/register"))
                .json(&json!({ "email": email, "password": password, "full_name": full_name }))
                .send()
                .await?
        }
        Commands::Login { email, password } => {
            client
                .post(format!("{api}/auth/login"))
                .json(&json!({ "email": email, "password": password }))
                .send()
                .await?
        }
        Commands::Refresh { refresh_token } => {
            client
                .post(format!("{api}/auth/refresh-token"))
                .json(&json!({ "refresh_token": refresh_token }))
                .send()
                .await?
        }
        Commands::Logout => {
            require_token(&cli.token)?;
            client
                .post(format!("{api}/auth/logout"))
                .headers(headers)
                .send()
                .await?
        }
        Commands::Me => {
            require_token(&cli.token)?;
            client
                .get(format!("{api}/users/me"))
                .headers(headers)
                .send()
                .await?
        }
    };

    print_response(res).await
}

fn require_token(token: &Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    if token.is_none() {
        return Err("this command needs --token or ACCOUNT_API_TOKEN".into());
    }
    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;

    let rendered = match serde_json::from_str::<Value>(&text) {
        Ok(json) => serde_json::to_string_pretty(&json)?,
        Err(_) => text,
    };

    if status.is_success() {
        println!("{rendered}");
        Ok(())
    } else {
        eprintln!("Error: API returned status {status}");
        eprintln!("{rendered}");
        Err(format!("request failed with status {status}").into())
    }
}
