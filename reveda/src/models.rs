/// ReVeda backend wire types (manually entered)
use serde_json::Value;

/// Every backend response is wrapped in this envelope.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct ApiResponse<T = Value> {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: &str) -> Self {
        FieldError {
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Patient,
    Doctor,
    Admin,
    Marketing,
}

#[allow(non_snake_case)]
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq)]
pub struct UserRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub firstName: String,
    pub lastName: String,
    pub email: String,
    pub phoneNumber: String,
    pub role: Role,
    pub isVerified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profilePicture: Option<String>,
    pub createdAt: String,
    pub updatedAt: String,
}

impl UserRecord {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.firstName, self.lastName)
            .trim()
            .to_string()
    }
}

#[allow(non_snake_case)]
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq)]
pub struct AuthTokens {
    pub accessToken: String,
    pub refreshToken: String,
}

/// An established session: token pair plus the cached user record.
#[allow(non_snake_case)]
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq)]
pub struct Session {
    pub accessToken: String,
    pub refreshToken: String,
    pub user: UserRecord,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Male,
    Female,
    Other,
}

#[allow(non_snake_case)]
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct Doctor {
    #[serde(rename = "_id")]
    pub id: String,
    pub firstName: String,
    pub lastName: String,
    pub email: String,
    pub phoneNumber: String,
    pub specialization: String,
    pub experience: String,
    pub fee: String,
    pub bio: Option<String>,
    pub image: Option<String>,
    pub rating: f64,
    pub isVerified: bool,
    pub gender: Gender,
    pub registrationNumber: String,
    pub kycVerify: bool,
    #[serde(default)]
    pub documents: Vec<String>,
    pub createdAt: String,
    pub updatedAt: String,
}

#[allow(non_snake_case)]
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq)]
pub struct SignupData {
    pub firstName: String,
    pub lastName: String,
    pub email: String,
    pub phoneNumber: String,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq)]
pub struct LoginData {
    /// email or phone number
    pub identifier: String,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq)]
pub struct VerifyOtpData {
    pub identifier: String,
    pub otp: String,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq)]
pub struct ResendOtpData {
    pub identifier: String,
}

#[allow(non_snake_case)]
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq)]
pub struct GoogleLoginData {
    pub idToken: String,
}

#[allow(non_snake_case)]
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq)]
pub struct RefreshTokenData {
    pub refreshToken: String,
}

#[allow(non_snake_case)]
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    #[serde(default)]
    pub otpSent: bool,
}

/// `data` of verify-otp and google-login responses
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq)]
pub struct AuthPayload {
    pub user: UserRecord,
    pub tokens: AuthTokens,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq)]
pub struct RefreshPayload {
    pub tokens: AuthTokens,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq)]
pub struct ProfilePayload {
    pub user: UserRecord,
}

#[allow(non_snake_case)]
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq)]
pub struct ProfilePicturePayload {
    pub user: UserRecord,
    pub profilePicture: String,
}

#[test]
fn test_user_record_wire_names() {
    let val = serde_json::json!({
        "_id": "64f0c2a1b2c3d4e5f6a7b8c9",
        "firstName": "Asha",
        "lastName": "Rao",
        "email": "asha@example.com",
        "phoneNumber": "9876543210",
        "role": "Patient",
        "isVerified": true,
        "createdAt": "2024-01-05T10:00:00.000Z",
        "updatedAt": "2024-01-05T10:00:00.000Z",
    });
    let user: UserRecord = serde_json::from_value(val).unwrap();
    assert_eq!(user.id, "64f0c2a1b2c3d4e5f6a7b8c9");
    assert_eq!(user.role, Role::Patient);
    assert_eq!(user.profilePicture, None);
    assert_eq!(user.full_name(), "Asha Rao");

    let back = serde_json::to_value(&user).unwrap();
    assert_eq!(back["_id"], "64f0c2a1b2c3d4e5f6a7b8c9");
    assert!(back.get("profilePicture").is_none());
}

#[test]
fn test_envelope_optional_fields() {
    let env: ApiResponse = serde_json::from_str(r#"{"success": true, "message": "ok"}"#).unwrap();
    assert!(env.success);
    assert_eq!(env.data, None);
    assert_eq!(env.errors, None);

    let env: ApiResponse = serde_json::from_str(
        r#"{"success": false, "message": "Validation failed",
            "errors": [{"field": "email", "message": "Email is required"}]}"#,
    )
    .unwrap();
    assert_eq!(
        env.errors,
        Some(vec![FieldError::new("email", "Email is required")])
    );
}
