use hyper::{Body, Request, StatusCode};

use super::error::{Result, RouteError};

/// The caller's identity. Session handling lives in the gateway in front of
/// this service, which injects these headers after authenticating; the
/// pipeline never sees credentials.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: i64,
    pub display_name: String,
}

pub fn identity(req: &Request<Body>) -> Result<Identity> {
    let user_id = header(req, "x-user-id")
        .and_then(|value| value.parse::<i64>().ok())
        .ok_or_else(|| RouteError::from((StatusCode::UNAUTHORIZED, "missing user identity")))?;

    let display_name = header(req, "x-display-name")
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("user-{user_id}"));

    Ok(Identity {
        user_id,
        display_name,
    })
}

fn header(req: &Request<Body>, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder().uri("/v1/rooms");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).expect("request")
    }

    #[test]
    fn reads_identity_headers() {
        let req = request(&[("x-user-id", "42"), ("x-display-name", "ada")]);

        let identity = identity(&req).expect("identity");
        assert_eq!(identity.user_id, 42);
        assert_eq!(identity.display_name, "ada");
    }

    #[test]
    fn display_name_falls_back_to_the_user_id() {
        let req = request(&[("x-user-id", "42")]);

        assert_eq!(identity(&req).expect("identity").display_name, "user-42");
    }

    #[test]
    fn missing_or_malformed_id_is_unauthorized() {
        assert!(identity(&request(&[])).is_err());
        assert!(identity(&request(&[("x-user-id", "forty-two")])).is_err());
    }
}
