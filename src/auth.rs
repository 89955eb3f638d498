use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;
use tracing::debug;

/// One shared password for every shop; the user name is informational.
#[derive(Debug)]
pub struct PetschedAuthSource {
    password: String,
}

impl PetschedAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for PetschedAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        debug!(user = ?login.user(), database = ?login.database(), "password requested");
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
