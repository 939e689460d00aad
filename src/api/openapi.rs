use crate::api::handlers::{admin, battery, door, health, oidc, status};
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    // Reuse the same router wiring and only return the generated OpenAPI document.
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Add new endpoints here via `.routes(routes!(...))` so they are both served
/// and included in the generated `OpenAPI` document.
pub(crate) fn api_router() -> OpenApiRouter {
    let mut router = OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .routes(routes!(door::open_door))
        .routes(routes!(oidc::login))
        .routes(routes!(oidc::callback))
        .routes(routes!(oidc::logout))
        .routes(routes!(status::auth_status))
        .routes(routes!(battery::battery))
        .routes(routes!(admin::auth))
        .routes(routes!(admin::check_auth))
        .routes(routes!(admin::logout))
        .routes(routes!(admin::list_users, admin::create_user))
        .routes(routes!(admin::update_user, admin::delete_user))
        .routes(routes!(admin::logs));

    let tags = [
        ("door", "Door opening with a PIN or an SSO session"),
        ("oidc", "OpenID Connect sign-in"),
        ("admin", "PIN holder and audit log administration"),
        ("health", "Service status"),
    ];
    // utoipa-axum 0.1 has no `get_openapi_mut`; split, edit the document, reassemble.
    let (axum_router, mut doc) = router.split_for_parts();
    doc.tags = Some(
        tags.into_iter()
            .map(|(name, description)| {
                let mut tag = Tag::new(name);
                tag.description = Some(description.to_string());
                tag
            })
            .collect(),
    );
    router = OpenApiRouter::with_openapi(doc).merge(OpenApiRouter::from(axum_router));

    router
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata instead of the utoipa-axum crate info defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    OpenApiBuilder::new().info(info).build()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() { None } else { Some(trimmed) }
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    if let Some(start) = author.find('<') {
        let name = author[..start].trim();
        let email = author[start + 1..].trim_end_matches('>').trim();
        (
            (!name.is_empty()).then_some(name),
            (!email.is_empty()).then_some(email),
        )
    } else {
        let name = author.trim();
        ((!name.is_empty()).then_some(name), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_author_splits_name_and_email() {
        assert_eq!(
            parse_author("Team Doorgate <team@doorgate.dev>"),
            (Some("Team Doorgate"), Some("team@doorgate.dev"))
        );
        assert_eq!(parse_author("Solo"), (Some("Solo"), None));
        assert_eq!(parse_author("<only@mail>"), (None, Some("only@mail")));
    }

    #[test]
    fn document_lists_every_route() {
        let doc = openapi();
        for path in [
            "/health",
            "/open-door",
            "/login",
            "/callback",
            "/logout",
            "/auth/status",
            "/battery",
            "/admin/auth",
            "/admin/check-auth",
            "/admin/logout",
            "/admin/users",
            "/admin/users/{name}",
            "/admin/logs",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
        assert_eq!(doc.info.title, env!("CARGO_PKG_NAME"));
        assert_eq!(
            doc.info.license.map(|license| license.name),
            Some("BSD-3-Clause".to_string())
        );
    }
}
