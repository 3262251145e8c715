//! HTTP helpers for subscriber endpoints.

use std::net::TcpListener;

use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

/// Returns a URL on a loopback port nothing listens on.
///
/// Requests to it fail with connection refused.
pub fn unreachable_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let port = listener.local_addr().expect("listener has an address").port();
    drop(listener);
    format!("http://127.0.0.1:{port}/webhook")
}

/// Mounts POST responses answered in order, one request per status.
///
/// The final status keeps answering once the sequence is used up.
pub async fn mount_status_sequence(server: &MockServer, statuses: &[u16]) {
    let Some((last, head)) = statuses.split_last() else {
        return;
    };

    for status in head {
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(*status))
            .up_to_n_times(1)
            .mount(server)
            .await;
    }

    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(*last))
        .mount(server)
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_endpoint_is_loopback() {
        assert!(unreachable_endpoint().starts_with("http://127.0.0.1:"));
    }
}
