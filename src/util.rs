use crate::peer::{format_endpoint, AxonInfo};

pub const LOOPBACK: &str = "127.0.0.1";

/// `http://{ip}:{port}/{name}` for a target axon. A target published under
/// our own external ip is reached over loopback instead.
pub fn format_url_string(target: &AxonInfo, name: &str, external_ip: &str) -> String {
    let ip = if target.ip == external_ip {
        LOOPBACK
    } else {
        target.ip.as_str()
    };
    format!("http://{}/{}", format_endpoint(ip, target.port), name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_url_string_test() {
        let target = AxonInfo::new("10.0.0.2", 8091, "hot");
        assert_eq!(
            format_url_string(&target, "Dummy", "10.0.0.1"),
            "http://10.0.0.2:8091/Dummy"
        );
        assert_eq!(
            format_url_string(&target, "Dummy", "10.0.0.2"),
            "http://127.0.0.1:8091/Dummy"
        );
        let v6 = AxonInfo::new("2001:db8::1", 8091, "hot");
        assert_eq!(
            format_url_string(&v6, "Dummy", "10.0.0.1"),
            "http://[2001:db8::1]:8091/Dummy"
        );
    }
}
