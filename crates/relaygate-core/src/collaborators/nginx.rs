use async_trait::async_trait;

use super::{run_command, CollaboratorError, ReverseProxy};

/// nginx driven through `nginx -t` and `systemctl`
pub struct Nginx {
    unit: String,
}

impl Nginx {
    pub fn new() -> Self {
        Self {
            unit: "nginx".to_string(),
        }
    }

    async fn systemctl(&self, action: &str) -> Result<(), CollaboratorError> {
        run_command("systemctl", &[action, &self.unit]).await?;
        tracing::debug!("systemctl {} {} succeeded", action, self.unit);
        Ok(())
    }
}

impl Default for Nginx {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReverseProxy for Nginx {
    async fn validate(&self) -> Result<(), CollaboratorError> {
        // nginx -t reports success on stderr too; only the exit status matters
        run_command("nginx", &["-t", "-q"]).await.map(|_| ())
    }

    async fn reload(&self) -> Result<(), CollaboratorError> {
        self.systemctl("reload").await
    }

    async fn start(&self) -> Result<(), CollaboratorError> {
        self.systemctl("start").await
    }

    async fn stop(&self) -> Result<(), CollaboratorError> {
        self.systemctl("stop").await
    }
}
