/// Builds the client used for backend calls. System proxy discovery stays off unless
/// explicitly enabled.
pub fn build_http_client(allow_system_proxy: bool) -> reqwest::Client {
    if allow_system_proxy {
        match attempt_build(false) {
            Ok(client) => return client,
            Err(error) => tracing::warn!(
                "HTTP client initialization with system proxy discovery failed ({}); retrying with no_proxy",
                error
            ),
        }
    }

    match attempt_build(true) {
        Ok(client) => client,
        Err(error) => {
            tracing::warn!(
                "HTTP client initialization failed ({}); falling back to default client",
                error
            );
            reqwest::Client::new()
        }
    }
}

fn attempt_build(no_proxy: bool) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder();
    if no_proxy {
        builder = builder.no_proxy();
    }
    builder.build()
}
