use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct RequestResetBody {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ValidateTokenBody {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmResetBody {
    pub token: String,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}
