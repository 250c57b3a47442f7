pub(crate) mod mpesa_service;
pub(crate) mod receipt_service;
pub(crate) mod settlement_service;
pub(crate) mod timeout_sweeper;
pub(crate) mod transaction_service;
