use anyhow::{anyhow, Context};
use reveda::auth::{parse_token_claims, redact_token};
use reveda_cli::pretty::*;
use reveda_cli::*;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use colored_json::to_colored_json_auto;
use log::{self, debug};
use std::io::Write;
use structopt::StructOpt;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

#[derive(StructOpt)]
#[structopt(rename_all = "kebab-case", about = "CLI interface for the ReVeda API")]
struct Opt {
    /// Backend base URL. Defaults depend on build type and platform
    #[structopt(global = true, long = "--api-url", env = "REVEDA_API_URL")]
    api_url: Option<String>,

    /// Per-request timeout, in seconds
    #[structopt(global = true, long = "--timeout-secs", env = "REVEDA_API_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Where the login session is persisted between invocations
    #[structopt(
        global = true,
        long = "--session-file",
        env = "REVEDA_SESSION_FILE",
        parse(from_os_str)
    )]
    session_file: Option<PathBuf>,

    /// Log more messages. Pass multiple times for ever more verbosity
    ///
    /// By default, it'll only report errors. Passing `-v` one time also prints
    /// warnings, `-vv` enables info logging, `-vvv` debug, and `-vvvv` trace.
    #[structopt(global = true, long, short = "v", parse(from_occurrences))]
    verbose: i8,

    /// Output raw JSON instead of the pretty-printed view
    #[structopt(global = true, long)]
    json: bool,

    #[structopt(long = "--shell-completions", hidden = true)]
    shell_completions: Option<structopt::clap::Shell>,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(StructOpt)]
enum Command {
    /// Register a new patient account; an OTP is sent to finish signing in
    Signup {
        #[structopt(long)]
        first_name: String,

        #[structopt(long)]
        last_name: String,

        #[structopt(long, short)]
        email: String,

        #[structopt(long, short)]
        phone: String,
    },

    /// Request a login OTP for an email address or phone number
    Login { identifier: String },

    /// Complete login with the OTP that was sent
    Verify { identifier: String, otp: String },

    /// Send the login OTP again
    ResendOtp { identifier: String },

    /// Sign in with a Google ID token
    GoogleLogin {
        #[structopt(env = "REVEDA_GOOGLE_ID_TOKEN", hide_env_values = true)]
        id_token: String,
    },

    /// Forget the local session
    Logout,

    /// Show the locally cached user, without contacting the backend
    Whoami,

    /// Fetch the current user's profile from the backend
    Profile,

    /// Upload a new profile picture
    UploadPicture {
        #[structopt(parse(from_os_str))]
        path: PathBuf,
    },

    /// List doctors
    Doctors,

    /// Check that the backend is up
    Health,

    /// Arbitrary authenticated API call, eg: `request get /doctors page==2`
    Request {
        method: ApiMethod,
        path: String,
        fields: Vec<ArgField>,
    },

    /// Summarize configuration and authentication
    Status,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let opt = Opt::from_args();

    let log_level = match opt.verbose {
        std::i8::MIN..=-1 => "none",
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        4..=std::i8::MAX => "trace",
    };
    // hyper logging is very verbose, so crank that down even if everything else is more verbose
    let log_filter = format!("{},hyper=error", log_level);
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_filter))
        .format_timestamp(None)
        .init();

    debug!("Args parsed, starting up");

    #[cfg(windows)]
    colored_json::enable_ansi_support();

    if let Some(shell) = opt.shell_completions {
        Opt::clap().gen_completions_to("reveda", shell, &mut std::io::stdout());
        std::process::exit(0);
    }

    if let Err(err) = run(opt) {
        // Be graceful about some errors
        if let Some(io_err) = err.root_cause().downcast_ref::<std::io::Error>() {
            if let std::io::ErrorKind::BrokenPipe = io_err.kind() {
                // presumably due to something like writing to stdout and piped to `head -n10` and
                // stdout was closed
                debug!("got BrokenPipe error, assuming stdout closed as expected and exiting with success");
                std::process::exit(0);
            }
        }
        let mut color_stderr = StandardStream::stderr(if atty::is(atty::Stream::Stderr) {
            ColorChoice::Auto
        } else {
            ColorChoice::Never
        });
        color_stderr.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true))?;
        eprintln!("Error: {:?}", err);
        if let Some(api_err) = err.downcast_ref::<ApiError>() {
            for fe in api_err.field_errors() {
                eprintln!("  {}: {}", fe.field, fe.message);
            }
        }
        color_stderr.set_color(&ColorSpec::new())?;
        std::process::exit(1);
    }
    Ok(())
}

fn print_result_json(result: Option<Value>) -> Result<()> {
    if let Some(val) = result {
        writeln!(&mut std::io::stdout(), "{}", to_colored_json_auto(&val)?)?
    };
    Ok(())
}

fn print_message(resp: &ApiResponse<Value>) -> Result<()> {
    writeln!(&mut std::io::stdout(), "{}", resp.message)?;
    Ok(())
}

fn build_config(opt: &Opt) -> Result<ApiConfig> {
    let config = match &opt.api_url {
        Some(url) if !url.trim().is_empty() => ApiConfig::new(url.trim()),
        _ => ApiConfig::from_env()?,
    };
    Ok(match opt.timeout_secs {
        Some(secs) => config.with_timeout(Duration::from_secs(secs)),
        None => config,
    })
}

fn run(opt: Opt) -> Result<()> {
    let config = build_config(&opt)?;
    let session_path = opt
        .session_file
        .clone()
        .unwrap_or_else(default_session_path);
    debug!("using session file {}", session_path.display());
    let store = SessionStore::open(FileBackend::new(&session_path))
        .with_context(|| format!("loading session from {}", session_path.display()))?;
    let client = ApiClient::new(config, Arc::new(store))?;

    let result: Option<Value> = match opt.cmd {
        Command::Status => {
            println!("Configuration");
            println!("  REVEDA_API_URL: {}", client.config().base_url);
            println!("  timeout: {:?}", client.config().timeout);
            println!("  session file: {}", session_path.display());
            let snapshot = client.session().snapshot();
            match (&snapshot.accessToken, &snapshot.user) {
                (Some(token), Some(user)) => {
                    println!("Session");
                    println!("  user: {} <{}>", user.full_name(), user.email);
                    println!("  access token: {}", redact_token(token));
                    match parse_token_claims(token) {
                        Ok(claims) => {
                            println!("  subject: {}", claims.subject);
                            if let Some(exp) = claims.expires_at {
                                let state = if claims.is_expired() {
                                    "expired"
                                } else {
                                    "valid"
                                };
                                println!("  expires at: {} ({})", exp, state);
                            }
                        }
                        Err(e) => println!("  claims: <unreadable: {}>", e),
                    }
                    println!(
                        "  refresh token: {}",
                        if snapshot.refreshToken.is_some() {
                            "<stored>"
                        } else {
                            "<missing>"
                        }
                    );
                }
                _ => println!("Session\n  not signed in"),
            }
            None
        }
        Command::Signup {
            first_name,
            last_name,
            email,
            phone,
        } => {
            let resp = client.signup(&SignupData {
                firstName: first_name,
                lastName: last_name,
                email,
                phoneNumber: phone,
            })?;
            print_message(&resp)?;
            None
        }
        Command::Login { identifier } => {
            let outcome = client.login(&identifier)?;
            if outcome.otpSent {
                println!("OTP sent to {}", identifier.trim());
            }
            None
        }
        Command::Verify { identifier, otp } => {
            let session = client.verify_otp(&identifier, &otp)?;
            println!("signed in as {}", session.user.full_name());
            None
        }
        Command::ResendOtp { identifier } => {
            print_message(&client.resend_otp(&identifier)?)?;
            None
        }
        Command::GoogleLogin { id_token } => {
            let session = client.login_with_google(&id_token)?;
            println!("signed in as {}", session.user.full_name());
            None
        }
        Command::Logout => {
            client.logout();
            None
        }
        Command::Whoami => {
            let user = client
                .current_user()
                .ok_or(anyhow!("not signed in (try `reveda login`)"))?;
            if opt.json {
                Some(serde_json::to_value(user)?)
            } else {
                let picture = user
                    .profilePicture
                    .as_deref()
                    .and_then(|p| client.image_url(p));
                pp_user(&user, picture)?;
                None
            }
        }
        Command::Profile => {
            let user = client.get_profile()?;
            if opt.json {
                Some(serde_json::to_value(user)?)
            } else {
                let picture = user
                    .profilePicture
                    .as_deref()
                    .and_then(|p| client.image_url(p));
                pp_user(&user, picture)?;
                None
            }
        }
        Command::UploadPicture { path } => {
            let mime = guess_image_mime(&path)?;
            let bytes = std::fs::read(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or(anyhow!("expected a file path: {}", path.display()))?;
            let payload = client.upload_profile_picture(file_name, mime, bytes)?;
            match client.image_url(&payload.profilePicture) {
                Some(url) => println!("profile picture updated: {}", url),
                None => println!("profile picture updated"),
            }
            None
        }
        Command::Doctors => {
            let doctors = client.get_doctors()?;
            if opt.json {
                Some(serde_json::to_value(doctors)?)
            } else {
                pp_doctors(&doctors)?;
                None
            }
        }
        Command::Health => {
            let resp = client.health_check()?;
            if opt.json {
                resp.data
            } else {
                print_message(&resp)?;
                None
            }
        }
        Command::Request {
            method,
            path,
            fields,
        } => {
            let params = params_from_fields(&fields);
            let body = value_from_fields(fields)
                .map(RequestBody::Json)
                .unwrap_or(RequestBody::Empty);
            let req = PendingRequest::new(method, &path, body).with_query(params);
            Some(serde_json::to_value(client.execute(req)?)?)
        }
    };
    print_result_json(result)?;
    Ok(())
}
