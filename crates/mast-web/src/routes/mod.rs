mod campaigns;
mod changesets;
mod health;
mod repositories;

pub use campaigns::campaign_routes;
pub use changesets::changeset_routes;
pub use health::health_routes;
pub use repositories::repository_routes;
