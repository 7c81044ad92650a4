/*!
Test Harness pour la console PlantWatch

Facilite l'écriture de tests d'intégration avec:
- Démarrage des deux stubs (REST + Socket.IO)
- Comptes pré-créés : un administrateur et un opérateur standard
- Attente bornée sur une condition asynchrone
*/

use crate::stub_api::StubApi;
use crate::stub_socket::StubSocket;
use std::future::Future;
use std::time::Duration;
use anyhow::Result;

pub const ADMIN_EMAIL: &str = "admin@plant.io";
pub const OPERATOR_EMAIL: &str = "ops@plant.io";
pub const PASSWORD: &str = "s3cret!";

/// Backend complet simulé pour un test
pub struct TestHarness {
    pub api: StubApi,
    pub socket: StubSocket,
    pub admin_id: i64,
    pub operator_id: i64,
}

impl TestHarness {
    /// Démarre les stubs et crée les comptes de base
    pub async fn start() -> Result<Self> {
        env_logger::builder().is_test(true).try_init().ok();

        let api = StubApi::spawn().await?;
        let socket = StubSocket::spawn().await?;
        let admin_id = api.add_user(ADMIN_EMAIL, PASSWORD, true);
        let operator_id = api.add_user(OPERATOR_EMAIL, PASSWORD, false);

        log::info!("🧪 Test harness ready (api={}, socket={})", api.url(), socket.url());
        Ok(Self { api, socket, admin_id, operator_id })
    }

    pub fn api_url(&self) -> String {
        self.api.url()
    }

    pub fn socket_url(&self) -> String {
        self.socket.url()
    }

    /// Un device IoT et une station pour chaque compte
    pub fn seed_fleet(&self) -> SeededFleet {
        SeededFleet {
            operator_sensor: self.api.add_device(self.operator_id, "boiler-temp", "iot_device", "temperature"),
            operator_station: self.api.add_device(self.operator_id, "press-line-pc", "end_device", "workstation"),
            admin_sensor: self.api.add_device(self.admin_id, "roof-humidity", "iot_device", "humidity"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SeededFleet {
    pub operator_sensor: String,
    pub operator_station: String,
    pub admin_sensor: String,
}

/// Réévalue `check` jusqu'à ce qu'il retourne true ou que `timeout` expire
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
