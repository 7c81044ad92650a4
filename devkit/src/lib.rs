/*!
# PlantWatch DevKit - Stubs pour tester la console sans plateforme

Bibliothèque facilitant les tests de la console PlantWatch avec:
- Backend REST simulé (auth, devices, monitoring) sur un port éphémère
- Serveur Socket.IO simulé pour le flux temps réel
- Builders de payloads de télémétrie (plats, imbriqués, legacy)
- Harness combinant les deux stubs
*/

pub mod stub_api;
pub mod stub_socket;
pub mod telemetry_builders;
pub mod test_utils;

pub use stub_api::{RecordedRequest, StubApi};
pub use stub_socket::StubSocket;
pub use telemetry_builders::TelemetryBuilder;
pub use test_utils::TestHarness;
