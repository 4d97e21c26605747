//! Business domains. Orchestration infrastructure lives in `kernel`.

pub mod campaigns;
