//! Tests for the JSON config file

#[cfg(test)]
mod tests {
    use crate::config::FileConfig;
    use crate::server::ServerOption;
    use std::time::Duration;

    #[test]
    fn test_empty_config_keeps_defaults() {
        let config = FileConfig::from_json("{}").unwrap();
        assert_eq!(config, FileConfig::default());

        let options = config.apply(ServerOption::default());
        assert_eq!(options.listen_port, 8787);
        assert_eq!(options.masquerade_host, "example.com");
        assert_eq!(options.fixed_credential, None);
    }

    #[test]
    fn test_config_overrides_defaults() {
        let config = FileConfig::from_json(
            r#"{
                "listen_host": "127.0.0.1",
                "listen_port": 9000,
                "connect_timeout_secs": 3,
                "doh_url": "https://dns.example/dns-query",
                "doh_timeout_secs": 2,
                "credential_path": "/cred",
                "uuid": "0f1e2d3c-4b5a-6978-8796-a5b4c3d2e1f0",
                "proxy_ip": "proxy.example:443"
            }"#,
        )
        .unwrap();

        let options = config.apply(ServerOption::default());
        assert_eq!(options.listen_host, "127.0.0.1");
        assert_eq!(options.listen_port, 9000);
        assert_eq!(options.connect_timeout, Duration::from_secs(3));
        assert_eq!(options.doh_url, "https://dns.example/dns-query");
        assert_eq!(options.doh_timeout, Duration::from_secs(2));
        assert_eq!(options.credential_path, "/cred");
        assert_eq!(
            options.fixed_credential.as_deref(),
            Some("0f1e2d3c-4b5a-6978-8796-a5b4c3d2e1f0")
        );
        assert_eq!(options.proxy_ip.as_deref(), Some("proxy.example:443"));
        // untouched fields keep their defaults
        assert_eq!(options.buffer_size, 8192);
        assert_eq!(options.upstream_proxy, None);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(FileConfig::from_json(r#"{"listen_prot": 1}"#).is_err());
        assert!(FileConfig::from_json(r#"{"listen_port": "abc"}"#).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let path = std::env::temp_dir().join("wsgate-missing-config.json");
        assert!(FileConfig::load(&path).is_err());
    }
}
