use std::path::PathBuf;

use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "siteconf-cli")]
#[command(about = "Admin CLI for the site configuration service", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:3090", env = "SITECONF_URL")]
    url: String,

    #[arg(short, long, env = "SITECONF_API_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the active site configuration and its id
    Get,
    /// Replace the site configuration with the contents of a file
    Put {
        file: PathBuf,
        /// Id of the configuration the edit is based on (see `get`)
        #[arg(long)]
        last_id: i32,
        #[arg(long, default_value_t = 0)]
        author_user_id: i32,
    },
    /// Validate a site configuration file without saving it
    Validate { file: PathBuf },
    /// List problems and warnings of the active configuration
    Problems,
    /// Whether a saved change needs a server restart
    RestartRequired,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );
    let client = reqwest::Client::builder().default_headers(headers).build()?;
    let base = cli.url.trim_end_matches('/');

    let res = match cli.command {
        Commands::Get => client.get(format!("{}/site-config", base)).send().await?,
        Commands::Put {
            file,
            last_id,
            author_user_id,
        } => {
            let contents = tokio::fs::read_to_string(&file).await?;
            client
                .put(format!("{}/site-config", base))
                .json(&json!({
                    "lastID": last_id,
                    "contents": contents,
                    "authorUserID": author_user_id,
                }))
                .send()
                .await?
        }
        Commands::Validate { file } => {
            let contents = tokio::fs::read_to_string(&file).await?;
            client
                .post(format!("{}/site-config/validate", base))
                .body(contents)
                .send()
                .await?
        }
        Commands::Problems => client.get(format!("{}/site-config/problems", base)).send().await?,
        Commands::RestartRequired => {
            client
                .get(format!("{}/site-config/restart-required", base))
                .send()
                .await?
        }
    };

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
