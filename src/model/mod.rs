pub mod app;
pub mod group;

pub use app::AppDefinition;
pub use group::Group;
