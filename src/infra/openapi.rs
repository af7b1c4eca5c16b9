//! OpenAPI configuration.

use crate::api::{
    greeting::{greeting_api, greeting_service},
    info::info_api,
};
use utoipa::OpenApi;

/// OpenApi configuration.
#[derive(OpenApi)]
#[openapi(
    paths(
        info_api::info,
        greeting_api::greeting,
        greeting_api::greetings,
    ),
    components(
        schemas(
            info_api::AppInfo,
            greeting_service::GreetingResponse,
            crate::infra::error::ErrorBody
        )
    )
)]
#[derive(Clone, Copy, Debug)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_greeting_routes() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/greeting/{name}"));
        assert!(doc.paths.paths.contains_key("/greetings/{name}"));
        assert!(doc.paths.paths.contains_key("/info"));
    }
}
