use crate::{Error, Result};
use std::net::IpAddr;
use std::time::Duration;
use tracing::{event, Level};

/// Plain text "what is my ip" services, tried in order.
pub const EXTERNAL_IP_SERVICES: &[&str] = &[
    "https://checkip.amazonaws.com",
    "https://api.ipify.org",
    "https://icanhazip.com",
    "https://ifconfig.me/ip",
];

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Our public ip as reported by the first service that answers with one.
pub async fn get_external_ip(client: &reqwest::Client) -> Result<String> {
    get_external_ip_from(client, EXTERNAL_IP_SERVICES).await
}

pub async fn get_external_ip_from(client: &reqwest::Client, services: &[&str]) -> Result<String> {
    for service in services {
        let response = match client.get(*service).timeout(LOOKUP_TIMEOUT).send().await {
            Ok(response) => response,
            Err(err) => {
                event!(Level::DEBUG, "external ip lookup via {} failed: {}", service, err);
                continue;
            }
        };
        match response.text().await {
            Ok(text) => match text.trim().parse::<IpAddr>() {
                Ok(ip) => return Ok(ip.to_string()),
                Err(_) => {
                    event!(Level::DEBUG, "{} did not answer with an ip: {:?}", service, text)
                }
            },
            Err(err) => event!(Level::DEBUG, "external ip lookup via {} failed: {}", service, err),
        }
    }
    Err(Error::ExternalIp(format!(
        "none of {} services answered",
        services.len()
    )))
}
