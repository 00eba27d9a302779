/*!
# Swarmboard DevKit - Fixtures pour tester le kernel sans cluster

Bibliothèque facilitant l'écriture de tests du kernel avec:
- Un faux état de swarm (nodes, networks, services, tasks) au format de l'Engine API
- Des champs "bruit" (Env, Labels, Secrets, Placement) marqués pour vérifier la redaction
- Des documents d'exposition node-exporter / cAdvisor paramétrables
*/

pub mod exposition;
pub mod swarm;

pub use exposition::{CadvisorFixture, NodeExporterFixture, TASK_ID_LABEL};
pub use swarm::{SwarmFixture, TaskFixture, SECRET_MARKER};
