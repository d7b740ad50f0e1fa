#[allow(non_snake_case)]
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    pub firstName: String,
    pub lastName: String,
    pub email: String,
    pub phoneNumber: String,
    pub role: String,
    pub isVerified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profilePicture: Option<String>,
    pub createdAt: String,
    pub updatedAt: String,
}

#[allow(non_snake_case)]
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq)]
pub struct Tokens {
    pub accessToken: String,
    pub refreshToken: String,
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
    pub gender: String,
    pub registrationNumber: String,
    pub kycVerify: bool,
    pub documents: Vec<String>,
    pub createdAt: String,
    pub updatedAt: String,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// A request the server turned down, rendered as a `success: false` envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub status: u16,
    pub message: String,
    pub errors: Vec<FieldError>,
}

impl Rejection {
    pub fn new(status: u16, message: &str) -> Self {
        Rejection {
            status,
            message: message.to_string(),
            errors: vec![],
        }
    }

    pub fn fields(errors: Vec<FieldError>) -> Self {
        Rejection {
            status: 400,
            message: "Validation failed".to_string(),
            errors,
        }
    }

    pub fn unauthorized(message: &str) -> Self {
        Rejection::new(401, message)
    }
}
