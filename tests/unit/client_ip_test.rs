#[path = "../test_utils.rs"]
mod test_utils;

use axum::http::{HeaderMap, HeaderValue};
use request_shield::core::{ClientIdentifier, UNKNOWN_CLIENT};
use test_utils::random_ip;

fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in pairs {
        map.insert(*name, HeaderValue::from_str(value).unwrap());
    }
    map
}

#[test]
fn test_forwarded_for_first_entry() {
    let id = ClientIdentifier::default();
    let h = headers(&[("x-forwarded-for", "192.168.1.1, 10.0.0.1")]);
    assert_eq!(id.resolve(&h, None, None), "192.168.1.1");
}

#[test]
fn test_real_ip_without_forwarded_for() {
    let id = ClientIdentifier::default();
    let h = headers(&[("x-real-ip", "192.168.1.2")]);
    assert_eq!(id.resolve(&h, None, None), "192.168.1.2");
}

#[test]
fn test_connection_address() {
    let id = ClientIdentifier::default();
    assert_eq!(id.resolve(&HeaderMap::new(), Some("192.168.1.3"), None), "192.168.1.3");
}

#[test]
fn test_socket_address() {
    let id = ClientIdentifier::default();
    assert_eq!(id.resolve(&HeaderMap::new(), None, Some("192.168.1.4")), "192.168.1.4");
}

#[test]
fn test_unknown_when_nothing_present() {
    let id = ClientIdentifier::default();
    assert_eq!(id.resolve(&HeaderMap::new(), None, None), UNKNOWN_CLIENT);
}

#[test]
fn test_empty_forwarded_for_falls_through() {
    let id = ClientIdentifier::default();
    let h = headers(&[("x-forwarded-for", "  "), ("x-real-ip", "192.168.1.5")]);
    assert_eq!(id.resolve(&h, Some("10.0.0.1"), None), "192.168.1.5");
}

#[test]
fn test_resolve_is_total() {
    let id = ClientIdentifier::default();
    for _ in 0..200 {
        let ip = random_ip();
        let pick = rand::random::<u8>() % 4;
        let h = match pick {
            0 => headers(&[("x-forwarded-for", format!("{}, 10.0.0.1", ip).as_str())]),
            1 => headers(&[("x-real-ip", ip.as_str())]),
            _ => HeaderMap::new(),
        };
        let connection = (pick == 2).then_some(ip.as_str());
        let socket = (pick == 3).then_some(ip.as_str());

        let resolved = id.resolve(&h, connection, socket);
        assert_eq!(resolved, ip);
        assert_ne!(resolved, UNKNOWN_CLIENT);
    }
}
