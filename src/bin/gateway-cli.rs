use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Management CLI for the Edge Gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gateway node status
    Status,
    /// List routes
    Routes,
    /// Create a route
    AddRoute {
        /// Where matched requests go, e.g. http://my-upstream/api
        upstream_url: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long = "host")]
        hosts: Vec<String>,
        #[arg(long = "path")]
        paths: Vec<String>,
        #[arg(long = "method")]
        methods: Vec<String>,
        #[arg(long)]
        strip_path: bool,
        #[arg(long)]
        preserve_host: bool,
        #[arg(long)]
        https_only: bool,
    },
    /// Delete a route by id
    DeleteRoute { id: String },
    /// List upstreams
    Upstreams,
    /// Create an upstream
    AddUpstream { name: String },
    /// Delete an upstream by id
    DeleteUpstream { id: String },
    /// List the target history of an upstream
    Targets { upstream_id: String },
    /// Add a target to an upstream. Weight 0 disables it.
    AddTarget {
        upstream_id: String,
        target: String,
        #[arg(long, default_value_t = 100)]
        weight: u32,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );
    let base = cli.url.trim_end_matches('/');

    let request = match cli.command {
        Commands::Status => client.get(format!("{}/admin/status", base)),
        Commands::Routes => client.get(format!("{}/admin/routes", base)),
        Commands::AddRoute {
            upstream_url,
            name,
            hosts,
            paths,
            methods,
            strip_path,
            preserve_host,
            https_only,
        } => client.post(format!("{}/admin/routes", base)).json(&json!({
            "name": name,
            "hosts": hosts,
            "paths": paths,
            "methods": methods,
            "strip_path": strip_path,
            "preserve_host": preserve_host,
            "https_only": https_only,
            "upstream_url": upstream_url,
        })),
        Commands::DeleteRoute { id } => client.delete(format!("{}/admin/routes/{}", base, id)),
        Commands::Upstreams => client.get(format!("{}/admin/upstreams", base)),
        Commands::AddUpstream { name } => client
            .post(format!("{}/admin/upstreams", base))
            .json(&json!({ "name": name })),
        Commands::DeleteUpstream { id } => client.delete(format!("{}/admin/upstreams/{}", base, id)),
        Commands::Targets { upstream_id } => {
            client.get(format!("{}/admin/upstreams/{}/targets", base, upstream_id))
        }
        Commands::AddTarget {
            upstream_id,
            target,
            weight,
        } => client
            .post(format!("{}/admin/upstreams/{}/targets", base, upstream_id))
            .json(&json!({ "target": target, "weight": weight })),
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await?;
    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let text = res.text().await?;
    if text.is_empty() {
        println!("{}", status);
        return Ok(());
    }
    let json: Value = serde_json::from_str(&text)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
