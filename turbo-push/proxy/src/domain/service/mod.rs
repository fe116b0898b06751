pub mod push_domain_service;

pub use push_domain_service::PushDomainService;
