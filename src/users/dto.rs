use serde::{Deserialize, Serialize};
use time::{
    macros::{format_description, time},
    Date,
};

use crate::error::AppError;
use crate::users::model::{Decision, ProfileUpdate, Role, SearchFilter, Status, User, UserStats};
use crate::validation::Checker;

/// Body of `POST /users/:id/approve-reject`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DecisionRequest {
    pub action: String,
    pub rejection_reason: Option<String>,
}

impl DecisionRequest {
    pub fn into_decision(self) -> Result<Decision, AppError> {
        let mut check = Checker::new();
        let reason = self
            .rejection_reason
            .map(|r| r.trim().to_owned())
            .filter(|r| !r.is_empty());
        let decision = match self.action.trim() {
            "approve" => Some(Decision::Approve),
            "reject" => match reason {
                Some(reason) => Some(Decision::Reject { reason }),
                None => {
                    check.fail(
                        "rejectionReason",
                        "Rejection reason is required when rejecting a user",
                    );
                    None
                }
            },
            _ => {
                check.fail("action", "Action must be either approve or reject");
                None
            }
        };
        check.finish()?;
        decision.ok_or_else(|| AppError::invalid("action", "Action must be either approve or reject"))
    }
}

/// Body of `PUT /users/profile`. Anything else in the payload, `role` and
/// `status` included, is dropped by deserialization.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileUpdateRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<String>,
    pub profile_picture: Option<String>,
}

impl ProfileUpdateRequest {
    pub fn validate(self) -> Result<ProfileUpdate, AppError> {
        let mut check = Checker::new();
        let first_name = self
            .first_name
            .as_deref()
            .map(|v| check.name("firstName", "First name", v));
        let last_name = self
            .last_name
            .as_deref()
            .map(|v| check.name("lastName", "Last name", v));
        let phone = check.phone(self.phone.as_deref());
        let date_of_birth = check.date_of_birth(self.date_of_birth.as_deref(), false);
        let profile_picture = self
            .profile_picture
            .map(|p| p.trim().to_owned())
            .filter(|p| !p.is_empty());
        check.finish()?;

        Ok(ProfileUpdate {
            first_name,
            last_name,
            phone,
            date_of_birth,
            profile_picture,
        })
    }
}

/// Query string of `GET /users/search`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    pub q: Option<String>,
    pub status: Option<String>,
    pub role: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

fn parse_day(check: &mut Checker, field: &'static str, value: Option<&str>) -> Option<Date> {
    let v = value?.trim();
    match Date::parse(v, format_description!("[year]-[month]-[day]")) {
        Ok(d) => Some(d),
        Err(_) => {
            check.fail(field, "Invalid date format");
            None
        }
    }
}

impl SearchQuery {
    pub fn into_filter(self) -> Result<SearchFilter, AppError> {
        let mut check = Checker::new();
        let status = match self.status.as_deref().filter(|s| !s.is_empty()) {
            Some(s) => s
                .parse::<Status>()
                .map_err(|_| check.fail("status", "Invalid status"))
                .ok(),
            None => None,
        };
        let role = match self.role.as_deref().filter(|s| !s.is_empty()) {
            Some(r) => r
                .parse::<Role>()
                .map_err(|_| check.fail("role", "Invalid role"))
                .ok(),
            None => None,
        };
        let from = parse_day(&mut check, "dateFrom", self.date_from.as_deref());
        let to = parse_day(&mut check, "dateTo", self.date_to.as_deref());
        if !(1..=100).contains(&self.limit) {
            check.fail("limit", "Limit must be between 1 and 100");
        }
        if self.offset < 0 {
            check.fail("offset", "Offset must not be negative");
        }
        check.finish()?;

        Ok(SearchFilter {
            query: self.q.map(|q| q.trim().to_owned()).filter(|q| !q.is_empty()),
            status,
            role,
            created_from: from.map(|d| d.midnight().assume_utc()),
            created_to: to.map(|d| d.with_time(time!(23:59:59.999_999_999)).assume_utc()),
            limit: self.limit,
            offset: self.offset,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct UsersList<T: Serialize = User> {
    pub users: Vec<T>,
    pub count: usize,
}

impl<T: Serialize> From<Vec<T>> for UsersList<T> {
    fn from(users: Vec<T>) -> Self {
        Self {
            count: users.len(),
            users,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatsBody {
    pub stats: UserStats,
}
