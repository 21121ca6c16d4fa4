//! Tests for egress parameter parsing and the dispatcher

#[cfg(test)]
mod tests {
    use crate::egress::{EgressDispatcher, EgressStrategy, Mode, ProxyTarget, UpgradeParams};
    use crate::error::DropReason;
    use crate::socks5::Socks5Endpoint;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use url::Url;

    fn params(target: &str) -> UpgradeParams {
        let url = Url::parse("http://localhost/").unwrap().join(target).unwrap();
        UpgradeParams::from_url(&url)
    }

    fn socks5(host: &str, port: u16) -> Socks5Endpoint {
        Socks5Endpoint {
            host: host.to_string(),
            port,
            username: Some("u".to_string()),
            password: Some("p".to_string()),
        }
    }

    fn proxy(host: &str) -> ProxyTarget {
        ProxyTarget {
            host: host.to_string(),
            port: None,
        }
    }

    #[test]
    fn test_auto_follows_query_order() {
        let p = params("/?s5=u:p@h:1080&proxyip=x");
        assert_eq!(p.mode, Mode::Auto);
        assert_eq!(
            p.strategies(),
            vec![
                EgressStrategy::Socks5(socks5("h", 1080)),
                EgressStrategy::FixedProxy(proxy("x")),
            ]
        );

        let p = params("/?proxyip=x&direct&s5=u:p@h:1080");
        assert_eq!(
            p.strategies(),
            vec![
                EgressStrategy::FixedProxy(proxy("x")),
                EgressStrategy::Direct,
                EgressStrategy::Socks5(socks5("h", 1080)),
            ]
        );
    }

    #[test]
    fn test_auto_without_keys_is_direct() {
        assert_eq!(params("/").strategies(), vec![EgressStrategy::Direct]);
        assert_eq!(params("/?foo=bar").strategies(), vec![EgressStrategy::Direct]);
    }

    #[test]
    fn test_auto_keeps_duplicates() {
        let p = params("/?direct&direct");
        assert_eq!(
            p.strategies(),
            vec![EgressStrategy::Direct, EgressStrategy::Direct]
        );
    }

    #[test]
    fn test_proxy_mode_tries_direct_first() {
        let p = params("/?mode=proxy&proxyip=1.2.3.4:8443");
        assert_eq!(p.mode, Mode::Proxy);
        assert_eq!(
            p.strategies(),
            vec![
                EgressStrategy::Direct,
                EgressStrategy::FixedProxy(ProxyTarget {
                    host: "1.2.3.4".to_string(),
                    port: Some(8443),
                }),
            ]
        );
    }

    #[test]
    fn test_explicit_modes() {
        assert_eq!(params("/?mode=direct&proxyip=x").strategies(), vec![EgressStrategy::Direct]);
        assert_eq!(
            params("/?mode=s5&s5=u:p@h:1080").strategies(),
            vec![EgressStrategy::Socks5(socks5("h", 1080))]
        );
    }

    #[test]
    fn test_unknown_mode_selects_nothing() {
        let p = params("/?mode=bogus&direct");
        assert_eq!(p.mode, Mode::Other("bogus".to_string()));
        assert!(p.strategies().is_empty());
    }

    #[test]
    fn test_missing_parameters_are_skipped() {
        assert!(params("/?mode=s5").strategies().is_empty());
        assert_eq!(
            params("/?mode=proxy").strategies(),
            vec![EgressStrategy::Direct]
        );
    }

    #[test]
    fn test_encoded_question_mark_is_repaired() {
        let p = params("/%3Fmode=proxy&proxyip=x");
        assert_eq!(p.mode, Mode::Proxy);
        assert_eq!(p.proxy, Some(proxy("x")));
    }

    #[test]
    fn test_socks5_from_path() {
        let p = params("/u:p@h:1080?mode=s5");
        assert_eq!(p.socks5, Some(socks5("h", 1080)));
    }

    #[test]
    fn test_defaults_fill_missing_parameters() {
        let default_socks5 = socks5("fallback", 1080);
        let default_proxy = proxy("fallback.example");

        let p = params("/?mode=proxy").with_defaults(Some(&default_socks5), Some(&default_proxy));
        assert_eq!(
            p.strategies(),
            vec![
                EgressStrategy::Direct,
                EgressStrategy::FixedProxy(default_proxy.clone()),
            ]
        );

        // Request parameters win over defaults
        let p = params("/?mode=s5&s5=u:p@h:1080").with_defaults(Some(&default_socks5), None);
        assert_eq!(p.socks5, Some(socks5("h", 1080)));
    }

    #[test]
    fn test_proxy_target_parse() {
        assert_eq!(
            ProxyTarget::parse("example.com:8443"),
            Some(ProxyTarget {
                host: "example.com".to_string(),
                port: Some(8443),
            })
        );
        assert_eq!(ProxyTarget::parse("example.com"), Some(proxy("example.com")));
        assert_eq!(ProxyTarget::parse("example.com:0"), Some(proxy("example.com")));
        assert_eq!(ProxyTarget::parse("example.com:abc"), Some(proxy("example.com")));
        assert_eq!(
            ProxyTarget::parse("[2001:db8::1]:443"),
            Some(ProxyTarget {
                host: "2001:db8::1".to_string(),
                port: Some(443),
            })
        );
        assert_eq!(ProxyTarget::parse(""), None);

        let target = proxy("example.com");
        assert_eq!(target.port_for(443), 443);
    }

    #[tokio::test]
    async fn test_dispatcher_falls_back_to_next_strategy() {
        // A port nothing listens on
        let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_port = dead.local_addr().unwrap().port();
        drop(dead);

        let live = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let live_port = live.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut conn, _) = live.accept().await.unwrap();
            conn.write_all(b"hello").await.unwrap();
        });

        let strategies = vec![
            EgressStrategy::Direct,
            EgressStrategy::FixedProxy(ProxyTarget {
                host: "127.0.0.1".to_string(),
                port: Some(live_port),
            }),
        ];

        let dispatcher = EgressDispatcher::new(Duration::from_secs(2));
        let mut stream = dispatcher
            .connect(&strategies, "127.0.0.1", dead_port)
            .await
            .unwrap();

        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn test_dispatcher_exhaustion() {
        let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_port = dead.local_addr().unwrap().port();
        drop(dead);

        let dispatcher = EgressDispatcher::new(Duration::from_secs(2));
        let result = dispatcher
            .connect(&[EgressStrategy::Direct], "127.0.0.1", dead_port)
            .await;
        assert_eq!(
            result.err(),
            Some(DropReason::EgressExhausted(format!("127.0.0.1:{}", dead_port)))
        );

        let result = dispatcher.connect(&[], "127.0.0.1", dead_port).await;
        assert!(matches!(result, Err(DropReason::EgressExhausted(_))));
    }
}
