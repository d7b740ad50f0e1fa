//! In-memory backend state: accounts, pending OTPs, issued tokens, and a few counters that tests
//! use to check client behavior.
use crate::models::{Doctor, FieldError, Rejection, Tokens, User};
use crate::tokens::{mint_token, new_object_id};
use crate::{created_at_now, unix_now};
use log::{debug, info};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevSettings {
    /// every OTP the server "sends" is this code
    pub otp_code: String,
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
}

impl Default for DevSettings {
    fn default() -> Self {
        DevSettings {
            otp_code: "123456".to_string(),
            access_ttl_secs: 15 * 60,
            refresh_ttl_secs: 7 * 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone)]
struct Grant {
    user_id: String,
    expires_at: i64,
}

#[derive(Debug)]
pub struct DevState {
    settings: DevSettings,
    users: Vec<User>,
    doctors: Vec<Doctor>,
    pending_otps: HashMap<String, String>,
    access_tokens: HashMap<String, Grant>,
    refresh_tokens: HashMap<String, Grant>,
    reject_access: bool,
    refresh_delay: Option<Duration>,
    omit_refresh_tokens: bool,
    refresh_calls: u64,
    request_counts: HashMap<String, u64>,
    last_authorization: HashMap<String, Option<String>>,
}

fn normalize(identifier: &str) -> String {
    identifier.trim().to_lowercase()
}

fn string_field(body: &Value, name: &str) -> Option<String> {
    body[name]
        .as_str()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn require(body: &Value, name: &str, label: &str, errors: &mut Vec<FieldError>) -> String {
    match string_field(body, name) {
        Some(v) => v,
        None => {
            errors.push(FieldError {
                field: name.to_string(),
                message: format!("{label} is required"),
            });
            String::new()
        }
    }
}

impl DevState {
    pub fn new(settings: DevSettings) -> Self {
        DevState {
            settings,
            users: vec![],
            doctors: seed_doctors(),
            pending_otps: HashMap::new(),
            access_tokens: HashMap::new(),
            refresh_tokens: HashMap::new(),
            reject_access: false,
            refresh_delay: None,
            omit_refresh_tokens: false,
            refresh_calls: 0,
            request_counts: HashMap::new(),
            last_authorization: HashMap::new(),
        }
    }

    pub fn settings(&self) -> &DevSettings {
        &self.settings
    }

    fn find_user(&self, identifier: &str) -> Option<usize> {
        let ident = normalize(identifier);
        self.users
            .iter()
            .position(|u| u.email.to_lowercase() == ident || u.phoneNumber == ident)
    }

    pub fn user(&self, id: &str) -> Option<&User> {
        self.users.iter().find(|u| u.id == id)
    }

    fn create_user(&mut self, first: &str, last: &str, email: &str, phone: &str) -> usize {
        let now = created_at_now();
        self.users.push(User {
            id: new_object_id(),
            firstName: first.to_string(),
            lastName: last.to_string(),
            email: email.to_lowercase(),
            phoneNumber: phone.to_string(),
            role: "Patient".to_string(),
            isVerified: false,
            profilePicture: None,
            createdAt: now.clone(),
            updatedAt: now,
        });
        info!("created user {}", email);
        self.users.len() - 1
    }

    fn issue_otp(&mut self, identifier: &str) {
        debug!("OTP for {} is {}", identifier, self.settings.otp_code);
        self.pending_otps
            .insert(normalize(identifier), self.settings.otp_code.clone());
    }

    fn mint_tokens(&mut self, user_id: &str) -> Tokens {
        let now = unix_now();
        self.prune_grants(now);
        let access = mint_token(user_id, "access", now, self.settings.access_ttl_secs);
        let refresh = mint_token(user_id, "refresh", now, self.settings.refresh_ttl_secs);
        self.access_tokens.insert(
            access.clone(),
            Grant {
                user_id: user_id.to_string(),
                expires_at: now + self.settings.access_ttl_secs,
            },
        );
        self.refresh_tokens.insert(
            refresh.clone(),
            Grant {
                user_id: user_id.to_string(),
                expires_at: now + self.settings.refresh_ttl_secs,
            },
        );
        Tokens {
            accessToken: access,
            refreshToken: refresh,
        }
    }

    pub fn signup(&mut self, body: &Value) -> Result<User, Rejection> {
        let mut errors = vec![];
        let first = require(body, "firstName", "First name", &mut errors);
        let last = require(body, "lastName", "Last name", &mut errors);
        let email = require(body, "email", "Email", &mut errors);
        let phone = require(body, "phoneNumber", "Phone number", &mut errors);
        if !errors.is_empty() {
            return Err(Rejection::fields(errors));
        }
        if self.find_user(&email).is_some() || self.find_user(&phone).is_some() {
            return Err(Rejection::new(
                409,
                "User with this email or phone number already exists",
            ));
        }
        let idx = self.create_user(&first, &last, &email, &phone);
        self.issue_otp(&email);
        Ok(self.users[idx].clone())
    }

    /// Sends an OTP. Unknown email addresses get a fresh Patient account.
    pub fn login(&mut self, body: &Value) -> Result<(), Rejection> {
        let mut errors = vec![];
        let identifier = require(body, "identifier", "Email or phone number", &mut errors);
        if !errors.is_empty() {
            return Err(Rejection::fields(errors));
        }
        if self.find_user(&identifier).is_none() {
            if !identifier.contains('@') {
                return Err(Rejection::new(404, "User not found"));
            }
            let local = identifier.split('@').next().unwrap_or_default().to_string();
            self.create_user(&local, "", &identifier, "");
        }
        self.issue_otp(&identifier);
        Ok(())
    }

    pub fn resend_otp(&mut self, body: &Value) -> Result<(), Rejection> {
        let mut errors = vec![];
        let identifier = require(body, "identifier", "Email or phone number", &mut errors);
        if !errors.is_empty() {
            return Err(Rejection::fields(errors));
        }
        if self.find_user(&identifier).is_none() {
            return Err(Rejection::new(404, "User not found"));
        }
        self.issue_otp(&identifier);
        Ok(())
    }

    pub fn verify_otp(&mut self, body: &Value) -> Result<(User, Tokens), Rejection> {
        let mut errors = vec![];
        let identifier = require(body, "identifier", "Email or phone number", &mut errors);
        let otp = require(body, "otp", "OTP", &mut errors);
        if !errors.is_empty() {
            return Err(Rejection::fields(errors));
        }
        let key = normalize(&identifier);
        match self.pending_otps.get(&key) {
            None => return Err(Rejection::new(400, "OTP expired or not requested")),
            Some(code) if *code != otp => return Err(Rejection::new(400, "Invalid OTP")),
            Some(_) => {}
        }
        let idx = self
            .find_user(&identifier)
            .ok_or(Rejection::new(404, "User not found"))?;
        self.pending_otps.remove(&key);
        self.users[idx].isVerified = true;
        self.users[idx].updatedAt = created_at_now();
        let user = self.users[idx].clone();
        let tokens = self.mint_tokens(&user.id);
        Ok((user, tokens))
    }

    /// Dev stand-in for Google token verification: an ID token containing `@` is taken as the
    /// account email, anything else signs in a shared test account.
    pub fn google_login(&mut self, body: &Value) -> Result<(User, Tokens), Rejection> {
        let mut errors = vec![];
        let id_token = require(body, "idToken", "Google ID token", &mut errors);
        if !errors.is_empty() {
            return Err(Rejection::fields(errors));
        }
        let email = if id_token.contains('@') {
            id_token
        } else {
            "google-user@example.com".to_string()
        };
        let idx = match self.find_user(&email) {
            Some(idx) => idx,
            None => self.create_user("Google", "User", &email, ""),
        };
        self.users[idx].isVerified = true;
        let user = self.users[idx].clone();
        let tokens = self.mint_tokens(&user.id);
        Ok((user, tokens))
    }

    fn prune_grants(&mut self, now: i64) {
        self.access_tokens.retain(|_, g| g.expires_at > now);
        self.refresh_tokens.retain(|_, g| g.expires_at > now);
    }

    /// Rotates the pair: the presented refresh token stops working.
    pub fn refresh(&mut self, body: &Value) -> Result<Tokens, Rejection> {
        self.refresh_calls += 1;
        let presented = string_field(body, "refreshToken")
            .ok_or(Rejection::unauthorized("Refresh token is required"))?;
        let grant = self
            .refresh_tokens
            .remove(&presented)
            .ok_or(Rejection::unauthorized("Invalid refresh token"))?;
        if grant.expires_at <= unix_now() {
            return Err(Rejection::unauthorized("Refresh token expired"));
        }
        Ok(self.mint_tokens(&grant.user_id))
    }

    /// Resolves an `Authorization` header to a user id.
    pub fn authorize(&self, header: Option<&str>) -> Result<String, Rejection> {
        let token = header
            .and_then(|h| h.strip_prefix("Bearer "))
            .ok_or(Rejection::unauthorized("Access token required"))?;
        if self.reject_access {
            return Err(Rejection::unauthorized("Access token rejected"));
        }
        match self.access_tokens.get(token) {
            Some(grant) if grant.expires_at > unix_now() => Ok(grant.user_id.clone()),
            Some(_) => Err(Rejection::unauthorized("Access token expired")),
            None => Err(Rejection::unauthorized("Invalid access token")),
        }
    }

    pub fn set_profile_picture(
        &mut self,
        user_id: &str,
        file_name: &str,
    ) -> Result<User, Rejection> {
        let user = self
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or(Rejection::new(404, "User not found"))?;
        let file_name = file_name.replace(['/', '\\'], "_");
        user.profilePicture = Some(format!("uploads/{}/{}", user_id, file_name));
        user.updatedAt = created_at_now();
        Ok(user.clone())
    }

    pub fn doctors(&self) -> &[Doctor] {
        &self.doctors
    }

    pub fn record_request(&mut self, path: &str, authorization: Option<&str>) {
        *self.request_counts.entry(path.to_string()).or_insert(0) += 1;
        self.last_authorization
            .insert(path.to_string(), authorization.map(|s| s.to_string()));
    }

    // test hooks

    /// Every access token issued so far stops working; refresh tokens are untouched.
    pub fn expire_access_tokens(&mut self) {
        let past = unix_now() - 1;
        for grant in self.access_tokens.values_mut() {
            grant.expires_at = past;
        }
    }

    pub fn revoke_refresh_tokens(&mut self) {
        self.refresh_tokens.clear();
    }

    /// While set, every access token is refused, including freshly refreshed ones.
    pub fn reject_access_tokens(&mut self, reject: bool) {
        self.reject_access = reject;
    }

    /// Holds every refresh request this long before answering it.
    pub fn delay_refresh(&mut self, delay: Option<Duration>) {
        self.refresh_delay = delay;
    }

    pub fn refresh_delay(&self) -> Option<Duration> {
        self.refresh_delay
    }

    /// While set, a successful refresh answers `success: true` but leaves out the tokens.
    pub fn omit_refresh_tokens(&mut self, omit: bool) {
        self.omit_refresh_tokens = omit;
    }

    pub fn omits_refresh_tokens(&self) -> bool {
        self.omit_refresh_tokens
    }

    pub fn grant_count(&self) -> usize {
        self.access_tokens.len() + self.refresh_tokens.len()
    }

    pub fn refresh_calls(&self) -> u64 {
        self.refresh_calls
    }

    pub fn request_count(&self, path: &str) -> u64 {
        self.request_counts.get(path).copied().unwrap_or(0)
    }

    pub fn last_authorization(&self, path: &str) -> Option<String> {
        self.last_authorization.get(path).cloned().flatten()
    }
}

fn seed_doctors() -> Vec<Doctor> {
    let now = created_at_now();
    let doctor = |first: &str,
                  last: &str,
                  specialty: &str,
                  years: &str,
                  fee: &str,
                  gender: &str| Doctor {
        id: new_object_id(),
        firstName: first.to_string(),
        lastName: last.to_string(),
        email: format!("{}.{}@reveda.dev", first, last).to_lowercase(),
        phoneNumber: "9000000000".to_string(),
        specialization: specialty.to_string(),
        experience: years.to_string(),
        fee: fee.to_string(),
        bio: None,
        image: None,
        rating: 4.5,
        isVerified: true,
        gender: gender.to_string(),
        registrationNumber: format!("DEV-{}", last.to_uppercase()),
        kycVerify: true,
        documents: vec![],
        createdAt: now.clone(),
        updatedAt: now.clone(),
    };
    vec![
        doctor("Meera", "Iyer", "Endocrinologist", "12 years", "800", "Female"),
        doctor("Arjun", "Menon", "General Physician", "8 years", "500", "Male"),
        doctor("Kavya", "Nair", "Nutritionist", "5 years", "400", "Female"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn otp_flow() {
        let mut state = DevState::new(Default::default());
        state.login(&json!({"identifier": "User@Example.com"})).unwrap();

        let err = state
            .verify_otp(&json!({"identifier": "user@example.com", "otp": "000000"}))
            .unwrap_err();
        assert_eq!(err.message, "Invalid OTP");

        let (user, tokens) = state
            .verify_otp(&json!({"identifier": "user@example.com", "otp": "123456"}))
            .unwrap();
        assert_eq!(user.email, "user@example.com");
        assert!(user.isVerified);
        let auth = format!("Bearer {}", tokens.accessToken);
        assert_eq!(state.authorize(Some(&auth)).unwrap(), user.id);

        // OTP is single use
        assert!(state
            .verify_otp(&json!({"identifier": "user@example.com", "otp": "123456"}))
            .is_err());
    }

    #[test]
    fn unknown_phone_is_rejected() {
        let mut state = DevState::new(Default::default());
        let err = state.login(&json!({"identifier": "9876543210"})).unwrap_err();
        assert_eq!(err.status, 404);
    }

    #[test]
    fn signup_field_errors() {
        let mut state = DevState::new(Default::default());
        let err = state.signup(&json!({"firstName": "Asha"})).unwrap_err();
        assert_eq!(err.status, 400);
        let fields: Vec<&str> = err.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["lastName", "email", "phoneNumber"]);

        let body = json!({
            "firstName": "Asha",
            "lastName": "Rao",
            "email": "asha@example.com",
            "phoneNumber": "9876543210",
        });
        state.signup(&body).unwrap();
        assert_eq!(state.signup(&body).unwrap_err().status, 409);
    }

    #[test]
    fn refresh_rotates() {
        let mut state = DevState::new(Default::default());
        let (_, google) = state.google_login(&json!({"idToken": "opaque"})).unwrap();
        let body = json!({"refreshToken": google.refreshToken});
        let fresh = state.refresh(&body).unwrap();
        assert_ne!(fresh.accessToken, google.accessToken);
        // old refresh token is gone
        assert_eq!(state.refresh(&body).unwrap_err().status, 401);
        assert_eq!(state.refresh_calls(), 2);
    }

    #[test]
    fn expiry_hooks() {
        let mut state = DevState::new(Default::default());
        let (_, tokens) = state.google_login(&json!({"idToken": "a@b.com"})).unwrap();
        let auth = format!("Bearer {}", tokens.accessToken);
        assert!(state.authorize(Some(&auth)).is_ok());

        state.expire_access_tokens();
        assert_eq!(
            state.authorize(Some(&auth)).unwrap_err().message,
            "Access token expired"
        );

        let fresh = state
            .refresh(&json!({"refreshToken": tokens.refreshToken}))
            .unwrap();
        let auth = format!("Bearer {}", fresh.accessToken);
        assert!(state.authorize(Some(&auth)).is_ok());

        state.reject_access_tokens(true);
        assert!(state.authorize(Some(&auth)).is_err());
        assert!(state.authorize(None).is_err());
    }

    #[test]
    fn expired_grants_are_pruned() {
        let mut state = DevState::new(Default::default());
        let (_, tokens) = state.google_login(&json!({"idToken": "a@b.com"})).unwrap();
        assert_eq!(state.grant_count(), 2);

        state.expire_access_tokens();
        state
            .refresh(&json!({"refreshToken": tokens.refreshToken}))
            .unwrap();
        // the expired access token went away with the rotated refresh token
        assert_eq!(state.grant_count(), 2);

        for _ in 0..5 {
            state.expire_access_tokens();
            state.google_login(&json!({"idToken": "a@b.com"})).unwrap();
        }
        // live refresh tokens are kept, every expired access token is dropped
        assert_eq!(state.grant_count(), 7);
    }

    #[test]
    fn profile_picture_path() {
        let mut state = DevState::new(Default::default());
        let (user, _) = state.google_login(&json!({"idToken": "a@b.com"})).unwrap();
        let updated = state.set_profile_picture(&user.id, "../me.png").unwrap();
        assert_eq!(
            updated.profilePicture,
            Some(format!("uploads/{}/.._me.png", user.id))
        );
    }
}
