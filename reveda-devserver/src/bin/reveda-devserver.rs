use reveda_devserver::*;
use anyhow::Result;

use log::{self, debug};
use structopt::StructOpt;

#[derive(StructOpt)]
#[structopt(
    rename_all = "kebab-case",
    about = "in-memory development backend for the ReVeda REST API"
)]
struct Opt {
    /// Log more messages. Pass multiple times for ever more verbosity
    #[structopt(global = true, long, short = "v", parse(from_occurrences))]
    verbose: i8,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(StructOpt)]
enum Command {
    /// Start the dev server as a foreground process
    Serve {
        #[structopt(long, env = "REVEDA_DEV_PORT", default_value = "5000")]
        port: u16,

        /// Code accepted for every OTP
        #[structopt(long, env = "REVEDA_DEV_OTP", default_value = "123456")]
        otp_code: String,

        /// Lifetime of access tokens, in seconds
        #[structopt(long, env = "REVEDA_DEV_ACCESS_TTL", default_value = "900")]
        access_ttl: i64,

        /// Lifetime of refresh tokens, in seconds
        #[structopt(long, env = "REVEDA_DEV_REFRESH_TTL", default_value = "604800")]
        refresh_ttl: i64,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let opt = Opt::from_args();

    let log_level = match opt.verbose {
        std::i8::MIN..=-1 => "none",
        0 => "info",
        1 => "debug",
        2..=std::i8::MAX => "trace",
    };
    // hyper logging is very verbose, so crank that down even if everything else is more verbose
    let cli_filter = format!("{},hyper=error", log_level);
    // defer to env var config, fallback to CLI settings
    let log_filter = std::env::var("RUST_LOG").unwrap_or(cli_filter);
    pretty_env_logger::formatted_timed_builder()
        .parse_filters(&log_filter)
        .init();

    debug!("config parsed, starting up");

    match opt.cmd {
        Command::Serve {
            port,
            otp_code,
            access_ttl,
            refresh_ttl,
        } => run_server(
            port,
            DevSettings {
                otp_code,
                access_ttl_secs: access_ttl,
                refresh_ttl_secs: refresh_ttl,
            },
        ),
    }
}
