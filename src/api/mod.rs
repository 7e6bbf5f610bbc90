pub mod campaigns;
pub mod webhooks;
