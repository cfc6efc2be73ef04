/// Project module
///
/// Projects are owned by the persistence collaborator; the engine reads them to
/// build agent contexts.

pub mod types;

pub use types::Project;
