//! kiln: submit the current directory's test suite to the CI server and
//! stream the results.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use std::io::Write;
use std::process;

use cli::client::{Client, ClientError, EventStream};
use cli::{archive, config};
use common::StreamEvent;

#[derive(Parser)]
#[clap(name = "kiln")]
#[clap(about = "Kiln CI client", long_about = None)]
struct Cli {
    /// Base URL of the kiln server
    #[clap(
        long,
        global = true,
        default_value = config::DEFAULT_SERVER_URL,
        env = "KILN_SERVER_URL"
    )]
    server_url: String,

    /// API key (also resolved from KILN_API_KEY or ~/.kiln/config)
    #[clap(long, global = true, env = "KILN_API_KEY")]
    api_key: Option<String>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Zip the current directory and run its tests
    Submit {
        /// Return the job id immediately instead of streaming
        #[clap(long)]
        detach: bool,
    },
    /// Reconnect to a job and stream its logs
    Wait {
        job_id: String,
        /// Replay all logs from the beginning
        #[clap(long = "all")]
        from_beginning: bool,
    },
    /// List your jobs
    List {
        /// Output as JSON
        #[clap(long)]
        json: bool,
    },
}

/// Conventional exit code for termination by SIGINT.
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() {
    dotenv().ok();
    let cli = Cli::parse();

    let api_key = config::resolve_api_key(cli.api_key.as_deref());
    let client = Client::new(cli.server_url.clone(), api_key);

    let outcome = match cli.command {
        Commands::Submit { detach } => submit(&client, detach).await,
        Commands::Wait {
            job_id,
            from_beginning,
        } => wait(&client, &job_id, from_beginning).await,
        Commands::List { json } => list(&client, json).await,
    };

    match outcome {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {e}");
            if e.is_auth() {
                eprintln!();
                eprintln!("Authentication required. Provide an API key using one of:");
                eprintln!("  1. Command line flag: --api-key <key>");
                eprintln!("  2. Environment variable: KILN_API_KEY=<key>");
                eprintln!("  3. Config file: ~/.kiln/config (format: api_key=<key>)");
            }
            process::exit(1);
        }
    }
}

async fn submit(client: &Client, detach: bool) -> Result<i32, ClientError> {
    let cwd = std::env::current_dir()?;
    let zip_bytes = archive::create_project_zip(&cwd)?;

    if detach {
        let job_id = client.submit_async(zip_bytes).await?;
        println!("Job submitted: {job_id}");
        return Ok(0);
    }

    let stream = client.submit_streaming(zip_bytes).await?;
    let success = consume_stream(stream, true).await?;
    Ok(if success { 0 } else { 1 })
}

async fn wait(client: &Client, job_id: &str, from_beginning: bool) -> Result<i32, ClientError> {
    let stream = client.wait(job_id, from_beginning).await?;
    let success = consume_stream(stream, false).await?;
    Ok(if success { 0 } else { 1 })
}

/// Print events as they arrive; returns the job's verdict. Ctrl-C exits 130
/// after a note that the job keeps running server-side.
async fn consume_stream(mut stream: EventStream, announce_job_id: bool) -> Result<bool, ClientError> {
    let mut success = false;
    loop {
        let event = tokio::select! {
            event = stream.next_event() => event?,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n\nInterrupted. The job continues to run on the server.");
                eprintln!("Reconnect with: kiln wait <job_id>");
                process::exit(EXIT_INTERRUPTED);
            }
        };
        let Some(event) = event else { break };

        match event {
            StreamEvent::JobId { job_id } => {
                if announce_job_id {
                    eprintln!("Job ID: {job_id}");
                    eprintln!("You can reconnect from another terminal with: kiln wait {job_id}");
                    eprintln!();
                }
            }
            StreamEvent::Log { data } => {
                print!("{data}");
                let _ = std::io::stdout().flush();
            }
            StreamEvent::Complete { success: verdict } => {
                success = verdict;
            }
        }
    }
    Ok(success)
}

async fn list(client: &Client, json: bool) -> Result<i32, ClientError> {
    let jobs = client.list_jobs().await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&jobs)
                .map_err(|e| ClientError::Protocol(e.to_string()))?
        );
        return Ok(0);
    }

    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(0);
    }

    println!(
        "{:<38} {:<12} {:<22} {:<22} {:<8}",
        "JOB ID", "STATUS", "START TIME", "END TIME", "SUCCESS"
    );
    println!("{}", "-".repeat(110));
    for job in &jobs {
        println!(
            "{:<38} {:<12} {:<22} {:<22} {:<8}",
            job.job_id,
            job.status.to_string(),
            format_time(job.start_time),
            format_time(job.end_time),
            format_success(job.success),
        );
    }
    Ok(0)
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    match time {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "N/A".to_string(),
    }
}

fn format_success(success: Option<bool>) -> &'static str {
    match success {
        Some(true) => "✓",
        Some(false) => "✗",
        None => "-",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::JobSummary;

    #[test]
    fn times_render_compactly() {
        assert_eq!(format_time(None), "N/A");
        let t = DateTime::parse_from_rfc3339("2026-08-02T10:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_time(Some(t)), "2026-08-02 10:30:00");
    }

    #[test]
    fn verdicts_render_as_marks() {
        assert_eq!(format_success(Some(true)), "✓");
        assert_eq!(format_success(Some(false)), "✗");
        assert_eq!(format_success(None), "-");
    }

    #[test]
    fn list_shape_deserializes() {
        let body = r#"[{"job_id":"j1","status":"completed","success":true,
            "start_time":"2026-08-02T10:30:00Z","end_time":"2026-08-02T10:31:00Z"}]"#;
        let jobs: Vec<JobSummary> = serde_json::from_str(body).unwrap();
        assert_eq!(jobs[0].job_id, "j1");
        assert_eq!(jobs[0].success, Some(true));
    }
}
