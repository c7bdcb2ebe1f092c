use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::users::model::{Role, Status};

/// JWT payload identifying a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,      // user ID
    pub email: String,
    pub role: Role,
    pub status: Status, // status when the token was issued
    pub iat: usize,
    pub exp: usize,
    pub iss: String,
    pub aud: String,
}
