pub mod demurrage;
pub mod dispatch;
pub mod event_payment;
pub mod health;
pub mod ledger;
pub mod notifier;
pub mod recurrence;
pub mod scheduler;
