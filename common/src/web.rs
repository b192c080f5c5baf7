//! Tiny inbound web interface: a status page plus reboot and factory
//! reset actions. Only the request path matters; everything else on the
//! wire is drained and ignored.

use log::{debug, info, warn};

use crate::config::{MonitorConfig, Url};
use crate::hal::{Connection, Listener, System};
use crate::FIRMWARE_VERSION;

/// Routes at most one pending client connection. Called once per tick so a
/// slow client cannot starve the control loop.
pub fn serve_once(
    listener: &mut impl Listener,
    sys: &mut impl System,
    config: &MonitorConfig,
    update_url: &Url,
    last_fw_check: i64,
) {
    let Some(mut client) = listener.poll_client() else {
        return;
    };
    debug!("client connected to web interface");

    if !find_literal(&mut client, b"GET ") {
        drain(&mut client);
        send_response(&mut client, "404 NOT FOUND", "text/plain", "Not found.\r\n");
        return;
    }

    // Longest interesting path is 4 bytes; anything longer is a 404.
    let mut path = [0u8; 4];
    let mut path_len = 0;
    while path_len < path.len() {
        match client.read_byte() {
            Some(b' ') | None => break,
            Some(b) => {
                path[path_len] = b;
                path_len += 1;
            }
        }
    }
    drain(&mut client);
    let path = &path[..path_len];
    debug!("path requested: {}", String::from_utf8_lossy(path));

    match path {
        b"/" => {
            let page = status_page(sys.chip_id(), config, update_url, last_fw_check);
            send_response(&mut client, "200 OK", "text/html", &page);
        }
        b"/rb?" => {
            send_response(&mut client, "200 OK", "text/html", ACTION_PAGE_REBOOT);
            client.flush();
            drop(client);
            info!("restarting at web client's request");
            sys.restart();
        }
        b"/rs?" => {
            send_response(&mut client, "200 OK", "text/html", ACTION_PAGE_RESET);
            client.flush();
            drop(client);
            if sys.format_storage() {
                info!("storage formatted, resetting");
                sys.erase_config();
                sys.reset();
            } else {
                warn!("formatting storage failed");
            }
        }
        _ => {
            send_response(&mut client, "404 NOT FOUND", "text/plain", "Not found.\r\n");
        }
    }
}

/// Consumes the stream until the literal has been seen whole. Returns
/// false if the stream ends first.
fn find_literal(conn: &mut impl Connection, literal: &[u8]) -> bool {
    let mut matched = 0;
    while matched < literal.len() {
        let Some(b) = conn.read_byte() else {
            return false;
        };
        if b == literal[matched] {
            matched += 1;
        } else {
            matched = usize::from(b == literal[0]);
        }
    }
    true
}

fn drain(conn: &mut impl Connection) {
    while conn.available() {
        let _ = conn.read_byte();
    }
}

fn send_response(conn: &mut impl Connection, status: &str, content_type: &str, body: &str) {
    let head = format!(
        "HTTP/1.0 {}\r\nContent-type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        content_type,
        body.len(),
    );
    conn.write_all(head.as_bytes());
    conn.write_all(body.as_bytes());
    conn.flush();
}

const PAGE_STYLE: &str = "body{font-family:verdana;display:flex;flex-direction:column;\
align-items:center;color:#3e3e3e;background-color:#f4f4f4}.wrap{align-content:center;\
padding:2rem}.info{text-align:left;font-size:1.15rem;display:inline-block;min-width:260px;\
max-width:500px}";

const ACTION_PAGE_REBOOT: &str = "<!DOCTYPE html><html><head>\
<title>Vivarium Monitor Web Interface</title></head><body>\
<h2>Vivarium Monitor Web Interface</h2>\
<h3>Node is rebooting.</h3></body></html>\r\n";

const ACTION_PAGE_RESET: &str = "<!DOCTYPE html><html><head>\
<title>Vivarium Monitor Web Interface</title></head><body>\
<h2>Vivarium Monitor Web Interface</h2>\
<h3>Node has been reset to default configuration.</h3></body></html>\r\n";

fn status_page(device_id: u32, config: &MonitorConfig, update_url: &Url, last_fw_check: i64) -> String {
    let update = if update_url.set {
        update_url.to_string()
    } else {
        "Not set".to_owned()
    };
    let report = if config.stats_url.set {
        config.stats_url.to_string()
    } else {
        "Not set".to_owned()
    };
    format!(
        "<!DOCTYPE html><html><head><title>Vivarium Monitor Web Interface</title>\
         <meta content=\"width=device-width,initial-scale=1\" name=viewport />\
         <style>{PAGE_STYLE}</style></head><body><div class=wrap><div class=info>\
         <h2>Vivarium Monitor Web Interface</h2><h3>Node information:</h3><ul>\
         <li><b>Device ID:</b> {device_id}</li>\
         <li><b>Firmware version:</b> {FIRMWARE_VERSION}</li>\
         <li><b>Last update check:</b> <span class=\"time\">{last_fw_check}</span></li>\
         <li><b>Update URL:</b> {update}</li>\
         <li><b>Report URL:</b> {report}</li>\
         <li><b>Temperature sensors:</b> {}</li>\
         <li><b>Hygrometer:</b> {}</li>\
         </ul></div><div class=actions>\
         <form action=/rb><input type=submit value=\"Reboot device\"/></form>\
         <form action=/rs><input type=submit value=\"Reset device\"/></form>\
         </div></div></body></html>\r\n",
        config.num_therm_sensors,
        if config.has_sht_sensor { "Yes" } else { "No" },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockListener, MockSystem};
    use pretty_assertions::assert_eq;

    fn config() -> MonitorConfig {
        MonitorConfig {
            has_sht_sensor: true,
            num_therm_sensors: 2,
            ..MonitorConfig::default()
        }
    }

    fn update_url() -> Url {
        Url::new("fw.example.com", "/image.bin", 80).unwrap()
    }

    #[test]
    fn no_pending_client_is_a_no_op() {
        let mut listener = MockListener::default();
        let mut sys = MockSystem::default();
        serve_once(&mut listener, &mut sys, &config(), &update_url(), 0);
        assert_eq!(listener.log_string(), "");
    }

    #[test]
    fn root_serves_the_status_page() {
        let mut listener = MockListener::with_request(b"GET / HTTP/1.1\r\nHost: node\r\n\r\n");
        let mut sys = MockSystem::default();

        serve_once(&mut listener, &mut sys, &config(), &update_url(), 12345);

        let sent = listener.log_string();
        assert!(sent.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(sent.contains(&format!("<li><b>Device ID:</b> {}</li>", sys.id)));
        assert!(sent.contains(&format!(
            "<li><b>Firmware version:</b> {FIRMWARE_VERSION}</li>"
        )));
        assert!(sent.contains("<span class=\"time\">12345</span>"));
        assert!(sent.contains("http://fw.example.com:80/image.bin"));
        assert!(sent.contains("<li><b>Report URL:</b> Not set</li>"));
        assert!(sent.contains("<li><b>Temperature sensors:</b> 2</li>"));
        assert_eq!(sys.restarts, 0);
    }

    #[test]
    fn reboot_route_restarts_after_responding() {
        let mut listener = MockListener::with_request(b"GET /rb? HTTP/1.1\r\n\r\n");
        let mut sys = MockSystem::default();

        serve_once(&mut listener, &mut sys, &config(), &update_url(), 0);

        assert!(listener.log_string().contains("Node is rebooting."));
        assert_eq!(sys.restarts, 1);
        assert_eq!(sys.resets, 0);
    }

    #[test]
    fn reset_route_formats_erases_and_resets() {
        let mut listener = MockListener::with_request(b"GET /rs? HTTP/1.1\r\n\r\n");
        let mut sys = MockSystem::default();

        serve_once(&mut listener, &mut sys, &config(), &update_url(), 0);

        assert!(listener
            .log_string()
            .contains("reset to default configuration"));
        assert_eq!(sys.formats, 1);
        assert_eq!(sys.erases, 1);
        assert_eq!(sys.resets, 1);
    }

    #[test]
    fn failed_format_skips_the_reset() {
        let mut listener = MockListener::with_request(b"GET /rs? HTTP/1.1\r\n\r\n");
        let mut sys = MockSystem {
            format_ok: false,
            ..MockSystem::default()
        };

        serve_once(&mut listener, &mut sys, &config(), &update_url(), 0);

        assert_eq!(sys.formats, 1);
        assert_eq!(sys.erases, 0);
        assert_eq!(sys.resets, 0);
    }

    #[test]
    fn unknown_path_gets_a_404() {
        let mut listener = MockListener::with_request(b"GET /favicon.ico HTTP/1.1\r\n\r\n");
        let mut sys = MockSystem::default();

        serve_once(&mut listener, &mut sys, &config(), &update_url(), 0);

        assert!(listener.log_string().starts_with("HTTP/1.0 404 NOT FOUND\r\n"));
        assert_eq!(sys.restarts, 0);
    }

    #[test]
    fn non_get_request_gets_a_404() {
        let mut listener = MockListener::with_request(b"POST /api HTTP/1.1\r\n\r\n{}");
        let mut sys = MockSystem::default();

        serve_once(&mut listener, &mut sys, &config(), &update_url(), 0);

        assert!(listener.log_string().starts_with("HTTP/1.0 404 NOT FOUND\r\n"));
    }
}
