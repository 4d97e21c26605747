//! Campaign domain: models, quotas, cooldowns, and dispatch.

pub mod batch;
pub mod cooldown;
pub mod dispatch;
pub mod model;
pub mod quota;

pub use batch::{run_batch, run_check};
pub use cooldown::{
    apply_cooldown, cooldown_duration, CampaignCooldown, CooldownStore, ResistanceKind,
};
pub use dispatch::{dispatch_campaign, dispatch_due_campaigns, DispatchOutcome, DispatchSummary};
pub use model::{Campaign, CampaignStore};
pub use quota::{DailyQuotaCounter, QuotaStore};
