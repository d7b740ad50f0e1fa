use crate::error::ApiError;
use crate::models::{FieldError, SignupData};
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

lazy_static! {
    // ASCII classes only
    static ref EMAIL_RE: Regex =
        Regex::new(r"^(?-u:\w)+([.-]?(?-u:\w)+)*@(?-u:\w)+([.-]?(?-u:\w)+)*(\.(?-u:\w){2,3})+$")
            .unwrap();
    // Indian mobile numbers, without country code
    static ref PHONE_RE: Regex = Regex::new(r"^[6-9][0-9]{9}$").unwrap();
    static ref OTP_RE: Regex = Regex::new(r"^[0-9]{6}$").unwrap();
}

/// What a user logs in with: an email address or a mobile number.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Identifier {
    Email(String),
    Phone(String),
}

impl FromStr for Identifier {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            Err(ApiError::invalid_field(
                "identifier",
                "Please enter your email or phone number",
            ))
        } else if EMAIL_RE.is_match(s) {
            Ok(Self::Email(s.to_string()))
        } else if PHONE_RE.is_match(s) {
            Ok(Self::Phone(s.to_string()))
        } else {
            Err(ApiError::invalid_field(
                "identifier",
                "Please enter a valid email or phone number",
            ))
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Email(v) => write!(f, "{}", v),
            Self::Phone(v) => write!(f, "{}", v),
        }
    }
}

/// A six digit one-time password.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Otp(String);

impl FromStr for Otp {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if OTP_RE.is_match(s) {
            Ok(Otp(s.to_string()))
        } else {
            Err(ApiError::invalid_field(
                "otp",
                "Please enter a valid 6-digit OTP",
            ))
        }
    }
}

impl fmt::Display for Otp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn check_name(field: &str, label: &str, value: &str, errors: &mut Vec<FieldError>) {
    let value = value.trim();
    if value.is_empty() {
        errors.push(FieldError::new(field, &format!("{label} is required")));
    } else if value.chars().count() < 2 {
        errors.push(FieldError::new(
            field,
            &format!("{label} must be at least 2 characters"),
        ));
    }
}

/// Checks every signup field, collecting all problems rather than stopping at the first.
pub fn validate_signup(data: &SignupData) -> Result<(), ApiError> {
    let mut errors = vec![];
    check_name("firstName", "First name", &data.firstName, &mut errors);
    check_name("lastName", "Last name", &data.lastName, &mut errors);

    let email = data.email.trim();
    if email.is_empty() {
        errors.push(FieldError::new("email", "Email is required"));
    } else if !EMAIL_RE.is_match(email) {
        errors.push(FieldError::new("email", "Please enter a valid email address"));
    }

    let phone = data.phoneNumber.trim();
    if phone.is_empty() {
        errors.push(FieldError::new("phoneNumber", "Phone number is required"));
    } else if !PHONE_RE.is_match(phone) {
        errors.push(FieldError::new(
            "phoneNumber",
            "Please enter a valid Indian phone number",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError::Validation {
            message: "Please correct the highlighted fields".to_string(),
            errors,
        })
    }
}

#[test]
fn test_identifier() {
    assert_eq!(
        Identifier::from_str("user@example.com").unwrap(),
        Identifier::Email("user@example.com".to_string())
    );
    assert_eq!(
        Identifier::from_str(" first.last@mail.co.in ").unwrap(),
        Identifier::Email("first.last@mail.co.in".to_string())
    );
    assert_eq!(
        Identifier::from_str("9876543210").unwrap(),
        Identifier::Phone("9876543210".to_string())
    );

    assert!(Identifier::from_str("").is_err());
    assert!(Identifier::from_str("   ").is_err());
    // landline-ish and too short
    assert!(Identifier::from_str("1234567890").is_err());
    assert!(Identifier::from_str("987654321").is_err());
    assert!(Identifier::from_str("user@example").is_err());
    assert!(Identifier::from_str("@example.com").is_err());
    // Devanagari digits, accented letters
    assert!(Identifier::from_str("9८७६५४३२१०").is_err());
    assert!(Identifier::from_str("ünï@exämple.com").is_err());

    match Identifier::from_str("nope") {
        Err(err) => assert_eq!(err.field_errors()[0].field, "identifier"),
        Ok(_) => panic!("expected failure"),
    }
}

#[test]
fn test_otp() {
    assert_eq!(Otp::from_str("123456").unwrap().to_string(), "123456");
    assert_eq!(Otp::from_str(" 000000 ").unwrap().to_string(), "000000");
    assert!(Otp::from_str("12345").is_err());
    assert!(Otp::from_str("1234567").is_err());
    assert!(Otp::from_str("12a456").is_err());
    // Arabic-Indic digits
    assert!(Otp::from_str("١٢٣٤٥٦").is_err());
    assert!(Otp::from_str("").is_err());
}

#[test]
fn test_validate_signup() {
    let mut data = SignupData {
        firstName: "Asha".to_string(),
        lastName: "Rao".to_string(),
        email: "asha@example.com".to_string(),
        phoneNumber: "9876543210".to_string(),
    };
    assert!(validate_signup(&data).is_ok());

    data.firstName = "A".to_string();
    data.lastName = " ".to_string();
    data.email = "asha@".to_string();
    data.phoneNumber = "5555555555".to_string();
    let err = validate_signup(&data).unwrap_err();
    let fields: Vec<&str> = err.field_errors().iter().map(|e| e.field.as_str()).collect();
    assert_eq!(fields, vec!["firstName", "lastName", "email", "phoneNumber"]);
    assert_eq!(
        err.field_errors()[1].message,
        "Last name is required"
    );
}
