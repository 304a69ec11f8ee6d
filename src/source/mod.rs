// Boundary collaborators: engine loader, generation service and placeholders.

pub mod generation;
pub mod http_loader;
pub mod placeholder;
pub mod traits;
