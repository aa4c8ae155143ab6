use colored::Colorize;
use linkweb::command_argument_builder;
use linkweb::handlers::{handle_crawl, handle_purge, handle_read, handle_serve};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let quiet = chosen_command.get_flag("quiet");

    let result = match chosen_command.subcommand() {
        Some(("serve", primary_command)) => {
            init_tracing("info");
            handle_serve(primary_command).await
        }
        Some(("crawl", primary_command)) => {
            init_tracing("warn");
            handle_crawl(primary_command, quiet).await
        }
        Some(("read", primary_command)) => {
            init_tracing("warn");
            handle_read(primary_command)
        }
        Some(("purge", primary_command)) => {
            init_tracing("warn");
            handle_purge(primary_command, quiet)
        }
        _ => unreachable!("clap should ensure we don't get here"),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}

/// Logs to stderr, filtered by `RUST_LOG` when set.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
