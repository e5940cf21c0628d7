//! ResourceService: the generic handler behind every route, plus request validation.

mod resource;
mod validation;
pub use resource::ResourceService;
pub use validation::RequestValidator;
