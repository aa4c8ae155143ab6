use clap::{Arg, arg, command, value_parser};
use url::Url;

pub const DEFAULT_BIND: &str = "0.0.0.0:8080";
pub const DEFAULT_DB_PATH: &str = "~/.config/linkweb/results.db";

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);

/// Crawl tunables shared by `serve` and `crawl`.
fn crawl_tuning_args() -> Vec<Arg> {
    vec![
        arg!(-d --"max-depth" <DEPTH>)
            .required(false)
            .help("Depth budget for each crawl; the root page counts as one level")
            .env("LINKWEB_MAX_DEPTH")
            .value_parser(value_parser!(u32))
            .default_value("7"),
        arg!(-l --"max-links" <COUNT>)
            .required(false)
            .help("Links followed per page before the rest of the page is ignored")
            .env("LINKWEB_MAX_LINKS")
            .value_parser(value_parser!(usize))
            .default_value("7"),
        arg!(-c --"concurrency" <NUM_FETCHES>)
            .required(false)
            .help("Concurrent page fetches allowed per crawl session")
            .env("LINKWEB_CONCURRENCY")
            .value_parser(value_parser!(usize))
            .default_value("3"),
        arg!(--"fetch-timeout" <SECONDS>)
            .required(false)
            .help("Connect and read timeout for each page fetch")
            .env("LINKWEB_FETCH_TIMEOUT")
            .value_parser(value_parser!(u64))
            .default_value("2"),
    ]
}

fn db_arg() -> Arg {
    arg!(--"db" <PATH>)
        .required(false)
        .help("Location of the SQLite results database")
        .env("LINKWEB_DB")
        .default_value(DEFAULT_DB_PATH)
}

/// Result store selection for the server.
fn store_args() -> Vec<Arg> {
    vec![
        db_arg(),
        arg!(--"memory")
            .required(false)
            .help("Keep results in memory only; overrides --db and LINKWEB_DB")
            .action(clap::ArgAction::SetTrue),
    ]
}

fn result_ttl_arg() -> Arg {
    arg!(--"result-ttl" <SECONDS>)
        .required(false)
        .help("How long a result stream stays readable after its last write")
        .env("LINKWEB_RESULT_TTL")
        .value_parser(value_parser!(u64))
        .default_value("60")
}

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("linkweb")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("linkweb")
        .about("Crawls the link graph below a URL and serves the edges as a pollable feed")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress non-essential output").required(false))
        .subcommand_required(true)
        .subcommand(
            command!("serve")
                .about("Runs the HTTP API and the crawl worker in one process")
                .arg(
                    arg!(-b --"bind" <ADDR>)
                        .required(false)
                        .help("Address the HTTP API listens on")
                        .env("LINKWEB_BIND")
                        .default_value(DEFAULT_BIND),
                )
                .arg(
                    arg!(--"allow-origin" <ORIGIN>)
                        .required(false)
                        .help("Origin allowed to call the API from a browser (repeatable)")
                        .action(clap::ArgAction::Append),
                )
                .args(crawl_tuning_args())
                .arg(result_ttl_arg())
                .args(store_args()),
        )
        .subcommand(
            command!("crawl")
                .about("Crawls a single URL in the foreground and prints edges as they are found")
                .arg(
                    arg!(<URL>)
                        .help("The root URL to crawl")
                        .value_parser(value_parser!(Url)),
                )
                .args(crawl_tuning_args())
                .arg(
                    arg!(--"json")
                        .required(false)
                        .help("Print one JSON edge record per line instead of a summary")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            command!("read")
                .about("Reads a page of a stored result stream, as the API would serve it")
                .arg(arg!(<SESSION_ID>).help("Session id from the results URL"))
                .arg(
                    arg!(-s --"start-index" <INDEX>)
                        .required(false)
                        .help("Index of the first record to read")
                        .value_parser(value_parser!(usize))
                        .default_value("0"),
                )
                .arg(
                    arg!(--"host" <HOST>)
                        .required(false)
                        .help("Host to use in the next-page link")
                        .default_value("localhost:8080"),
                )
                .arg(db_arg()),
        )
        .subcommand(
            command!("purge")
                .about("Deletes expired result streams from the results database")
                .arg(db_arg()),
        )
}
