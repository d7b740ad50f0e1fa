use anyhow::{anyhow, Result};
use log::{error, info};
use rouille::{router, Request, Response};
use serde_json::{json, Value};
use std::io::Read;
use std::net::SocketAddr;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

mod models;
mod state;
mod tokens;

pub use models::*;
pub use state::{DevSettings, DevState};
pub use tokens::{mint_token, new_object_id};

/// Helper to generate the current timestamp as right now, UTC, formatted as an RFC 3339 string.
///
/// Millisecond precision, like the production backend.
///
/// Returns something like "2022-11-22T09:21:15.640Z"
pub fn created_at_now() -> String {
    let now = time::OffsetDateTime::now_utc();
    // remove microsecond precision, but retain millisecond precision
    let ms = now.millisecond();
    let now = now.replace_microsecond(0).unwrap_or(now);
    let now = now.replace_millisecond(ms).unwrap_or(now);
    now.format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

pub fn unix_now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

fn envelope(status: u16, message: &str, data: Option<Value>) -> Response {
    let mut body = json!({
        "success": (200..300).contains(&status),
        "message": message,
    });
    if let Some(data) = data {
        body["data"] = data;
    }
    Response::json(&body).with_status_code(status)
}

fn reject(r: Rejection) -> Response {
    let mut body = json!({
        "success": false,
        "message": r.message,
        "error": r.message,
    });
    if !r.errors.is_empty() {
        body["errors"] = json!(r.errors);
    }
    Response::json(&body).with_status_code(r.status)
}

fn json_body(request: &Request) -> Result<Value, Rejection> {
    rouille::input::json_input(request).map_err(|_| Rejection::new(400, "Invalid JSON body"))
}

fn lock(state: &Mutex<DevState>) -> MutexGuard<'_, DevState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reads the `image` field of a multipart upload, returning its file name.
fn read_image_upload(request: &Request) -> Result<String, Rejection> {
    let missing = || {
        Rejection::fields(vec![FieldError {
            field: "image".to_string(),
            message: "Image file is required".to_string(),
        }])
    };
    let mut multipart = rouille::input::multipart::get_multipart_input(request)
        .map_err(|_| Rejection::new(400, "Expected multipart/form-data"))?;
    let mut file_name = None;
    while let Some(mut field) = multipart.next() {
        if &*field.headers.name != "image" {
            continue;
        }
        let mut buf = Vec::new();
        if field.data.read_to_end(&mut buf).is_ok() && !buf.is_empty() {
            file_name = Some(
                field
                    .headers
                    .filename
                    .clone()
                    .unwrap_or_else(|| "upload".to_string()),
            );
        }
    }
    file_name.ok_or_else(missing)
}

fn route(request: &Request, state: &Mutex<DevState>) -> Response {
    lock(state).record_request(&request.url(), request.header("Authorization"));

    router!(request,
        (GET) ["/health"] => {
            envelope(200, "ReVeda dev server is healthy", Some(json!({
                "status": "ok",
                "time": created_at_now(),
            })))
        },
        (POST) ["/auth/signup"] => {
            let res = json_body(request).and_then(|body| lock(state).signup(&body));
            match res {
                Ok(user) => envelope(201, "Signup successful, OTP sent", Some(json!({
                    "userId": user.id,
                }))),
                Err(r) => reject(r),
            }
        },
        (POST) ["/auth/login"] => {
            match json_body(request).and_then(|body| lock(state).login(&body)) {
                Ok(()) => envelope(200, "OTP sent", Some(json!({"otpSent": true}))),
                Err(r) => reject(r),
            }
        },
        (POST) ["/auth/resend-otp"] => {
            match json_body(request).and_then(|body| lock(state).resend_otp(&body)) {
                Ok(()) => envelope(200, "OTP resent", Some(json!({"otpSent": true}))),
                Err(r) => reject(r),
            }
        },
        (POST) ["/auth/verify-otp"] => {
            match json_body(request).and_then(|body| lock(state).verify_otp(&body)) {
                Ok((user, tokens)) => envelope(200, "Login successful", Some(json!({
                    "user": user,
                    "tokens": tokens,
                }))),
                Err(r) => reject(r),
            }
        },
        (POST) ["/auth/google-login"] => {
            match json_body(request).and_then(|body| lock(state).google_login(&body)) {
                Ok((user, tokens)) => envelope(200, "Google login successful", Some(json!({
                    "user": user,
                    "tokens": tokens,
                }))),
                Err(r) => reject(r),
            }
        },
        (POST) ["/auth/refresh-token"] => {
            let delay = lock(state).refresh_delay();
            if let Some(delay) = delay {
                // sleep without holding the lock
                std::thread::sleep(delay);
            }
            let res = json_body(request).and_then(|body| {
                let mut state = lock(state);
                state.refresh(&body).map(|tokens| (tokens, state.omits_refresh_tokens()))
            });
            match res {
                Ok((_, true)) => envelope(200, "Token refreshed", Some(json!({}))),
                Ok((tokens, false)) => {
                    envelope(200, "Token refreshed", Some(json!({"tokens": tokens})))
                }
                Err(r) => reject(r),
            }
        },
        (GET) ["/auth/profile"] => {
            let state = lock(state);
            let res = state.authorize(request.header("Authorization")).and_then(|id| {
                state.user(&id).cloned().ok_or(Rejection::new(404, "User not found"))
            });
            match res {
                Ok(user) => envelope(200, "Profile fetched", Some(json!({"user": user}))),
                Err(r) => reject(r),
            }
        },
        (POST) ["/auth/profile-image"] => {
            let user_id = match lock(state).authorize(request.header("Authorization")) {
                Ok(id) => id,
                Err(r) => return reject(r),
            };
            // read the upload without holding the lock
            let res = read_image_upload(request)
                .and_then(|file_name| lock(state).set_profile_picture(&user_id, &file_name));
            match res {
                Ok(user) => envelope(200, "Profile picture updated", Some(json!({
                    "profilePicture": user.profilePicture,
                    "user": user,
                }))),
                Err(r) => reject(r),
            }
        },
        (GET) ["/doctors"] => {
            let state = lock(state);
            match state.authorize(request.header("Authorization")) {
                Ok(_) => envelope(200, "Doctors fetched", Some(json!(state.doctors()))),
                Err(r) => reject(r),
            }
        },
        _ => reject(Rejection::new(404, "Route not found"))
    )
}

fn handle(request: &Request, state: &Mutex<DevState>) -> Response {
    let log_ok = |req: &Request, resp: &Response, elap: std::time::Duration| {
        info!(
            "{} {} {} ({:?})",
            req.method(),
            req.raw_url(),
            resp.status_code,
            elap
        );
    };
    let log_err = |req: &Request, elap: std::time::Duration| {
        error!(
            "HTTP handler panicked: {} {} ({:?})",
            req.method(),
            req.raw_url(),
            elap
        );
    };
    rouille::log_custom(request, log_ok, log_err, || route(request, state))
}

/// Runs the dev server in the foreground, forever.
pub fn run_server(port: u16, settings: DevSettings) -> Result<()> {
    let state = Mutex::new(DevState::new(settings));
    info!("dev server listening on port {}", port);
    rouille::start_server(format!("0.0.0.0:{}", port), move |request| {
        handle(request, &state)
    });
}

/// Dev server on an ephemeral localhost port, running in a background thread. Stops on drop.
///
/// Mostly for tests: the state is shared, so tests can expire tokens or inspect counters while
/// the server is running.
pub struct DevServer {
    addr: SocketAddr,
    state: Arc<Mutex<DevState>>,
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl DevServer {
    pub fn spawn(settings: DevSettings) -> Result<Self> {
        let state = Arc::new(Mutex::new(DevState::new(settings)));
        let handler_state = state.clone();
        let server = rouille::Server::new("127.0.0.1:0", move |request| {
            handle(request, &handler_state)
        })
        .map_err(|e| anyhow!("could not bind dev server: {}", e))?;
        let addr = server.server_addr();
        let (thread, stop) = server.stoppable();
        info!("dev server spawned on {}", addr);
        Ok(DevServer {
            addr,
            state,
            stop: Some(stop),
            thread: Some(thread),
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn state(&self) -> MutexGuard<'_, DevState> {
        lock(&self.state)
    }
}

impl Drop for DevServer {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[test]
fn test_created_at_now() {
    // eg: 2022-11-22T09:20:44.123Z
    let ts = created_at_now();
    println!("{ts}");
    assert_eq!(&ts[4..5], "-");
    assert_eq!(&ts[7..8], "-");
    assert_eq!(&ts[10..11], "T");
    assert_eq!(&ts[23..24], "Z");
}
