mod common;

use common::{config, Harness};
use novade_core::config::DataBridgeConfig;
use novade_xwayland_bridge::wayland::{DataDeviceEvent, Rect, SelectionKind};
use novade_xwayland_bridge::x11::{bytes_to_u32s, XConnection};
use pretty_assertions::assert_eq;
use rand::Rng;
use rstest::rstest;

fn payload(len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen_range(b'a'..=b'z')).collect()
}

#[rstest]
#[case::single_property(16)]
#[case::incremental(1024)]
fn test_x11_clipboard_is_readable_from_wayland(#[case] len: usize) {
    let mut h = Harness::new(&config(256));
    let x = h.x_client(Rect::new(0, 0, 100, 100));
    let mut w = h.wayland_client(Rect::new(200, 0, 100, 100));
    let data = payload(len);
    let text_plain = x.atom("text/plain");
    let mut owner =
        x.own(x.atoms.clipboard, vec![(x.atoms.utf8_string, data.clone()), (text_plain, data.clone())], 256);
    w.focus(&mut h.wl);

    let (offer, mimes) = h.wait_for("the X clipboard", |h| {
        x.serve(&mut owner);
        w.selection_offer(&mut h.wl, SelectionKind::Clipboard)
    });
    assert_eq!(mimes, vec!["text/plain;charset=utf-8".to_string(), "text/plain".to_string()]);

    let received = w.receive(&mut h, offer, "text/plain", |_| x.serve(&mut owner));
    assert_eq!(received, data);
    assert_eq!(owner.handler.rendered, vec![text_plain]);
}

#[test]
fn test_mime_types_follow_owner_target_order() {
    let mut h = Harness::new(&DataBridgeConfig::default());
    let x = h.x_client(Rect::new(0, 0, 100, 100));
    let mut w = h.wayland_client(Rect::new(200, 0, 100, 100));
    let targets = ["image/png", "text/html", "application/x-custom"];
    let data = targets.iter().map(|name| (x.atom(name), name.as_bytes().to_vec())).collect();
    let mut owner = x.own(x.atoms.clipboard, data, 1024);
    w.focus(&mut h.wl);

    let (offer, mimes) = h.wait_for("the X clipboard", |h| {
        x.serve(&mut owner);
        w.selection_offer(&mut h.wl, SelectionKind::Clipboard)
    });
    assert_eq!(mimes, targets.to_vec());
    assert_eq!(w.receive(&mut h, offer, "text/html", |_| x.serve(&mut owner)), b"text/html".to_vec());
}

#[test]
fn test_owner_without_targets_publishes_empty_offer() {
    let mut h = Harness::new(&DataBridgeConfig::default());
    let x = h.x_client(Rect::new(0, 0, 100, 100));
    let mut w = h.wayland_client(Rect::new(200, 0, 100, 100));
    let mut owner = x.own(x.atoms.clipboard, Vec::new(), 1024);
    w.focus(&mut h.wl);

    let (_, mimes) = h.wait_for("the X clipboard", |h| {
        x.serve(&mut owner);
        w.selection_offer(&mut h.wl, SelectionKind::Clipboard)
    });
    assert!(mimes.is_empty());
}

#[test]
fn test_focus_change_before_targets_reply_still_offers_selection() {
    let mut h = Harness::new(&DataBridgeConfig::default());
    let x = h.x_client(Rect::new(0, 0, 100, 100));
    let mut first = h.wayland_client(Rect::new(200, 0, 100, 100));
    let mut second = h.wayland_client(Rect::new(400, 0, 100, 100));
    first.focus(&mut h.wl);
    let mut owner = x.own(x.atoms.clipboard, vec![(x.atoms.utf8_string, b"hello".to_vec())], 1024);

    // The bridge asks for TARGETS; the owner has not answered yet.
    h.dispatch();
    second.focus(&mut h.wl);

    let (offer, mimes) = h.wait_for("the X clipboard", |h| {
        x.serve(&mut owner);
        second.selection_offer(&mut h.wl, SelectionKind::Clipboard)
    });
    assert_eq!(mimes, vec!["text/plain;charset=utf-8".to_string()]);
    assert!(first.selection_offer(&mut h.wl, SelectionKind::Clipboard).is_none());
    assert_eq!(
        second.receive(&mut h, offer, "text/plain;charset=utf-8", |_| x.serve(&mut owner)),
        b"hello".to_vec()
    );
}

#[rstest]
#[case::single_property(16)]
#[case::incremental(1024)]
fn test_wayland_clipboard_is_readable_from_x11(#[case] len: usize) {
    let mut h = Harness::new(&config(256));
    let x = h.x_client(Rect::new(0, 0, 100, 100));
    let mut w = h.wayland_client(Rect::new(200, 0, 100, 100));
    let data = payload(len);
    let offered = [("text/plain;charset=utf-8", data.as_slice()), ("text/plain", data.as_slice())];
    w.set_selection(&mut h.wl, SelectionKind::Clipboard, &offered);
    h.dispatch();
    let window = h.bridge.selection_window(SelectionKind::Clipboard);
    assert_eq!(Some(x.conn.get_selection_owner(x.atoms.clipboard).unwrap()), window);

    h.wl.set_keyboard_focus(Some(x.surface));
    let targets = x.read(&mut h, x.atoms.clipboard, x.atoms.targets, |_| {});
    let targets = bytes_to_u32s(&targets.bytes);
    assert_eq!(targets[..2], [x.atoms.targets, x.atoms.timestamp]);
    assert!(targets.contains(&x.atoms.utf8_string));
    assert!(targets.contains(&x.atoms.string));

    let read = x.read(&mut h, x.atoms.clipboard, x.atoms.utf8_string, |h| w.sync(&mut h.wl));
    assert_eq!(read.type_, x.atoms.utf8_string);
    assert_eq!(read.bytes, data);
}

#[test]
fn test_x11_client_without_focus_cannot_read_wayland_clipboard() {
    let mut h = Harness::new(&DataBridgeConfig::default());
    let x = h.x_client(Rect::new(0, 0, 100, 100));
    let mut w = h.wayland_client(Rect::new(200, 0, 100, 100));
    w.set_selection(&mut h.wl, SelectionKind::Clipboard, &[("text/plain", &b"secret"[..])]);
    h.dispatch();

    let read = x.read(&mut h, x.atoms.clipboard, x.atoms.string, |h| w.sync(&mut h.wl));
    assert!(read.is_empty());
    assert_eq!(w.count(|event| matches!(event, DataDeviceEvent::SourceCancelled { .. })), 0);

    h.wl.set_keyboard_focus(Some(x.surface));
    let read = x.read(&mut h, x.atoms.clipboard, x.atoms.string, |h| w.sync(&mut h.wl));
    assert_eq!(read.bytes, b"secret".to_vec());

    // Focus moves back to the Wayland client: reads are refused again.
    w.focus(&mut h.wl);
    h.dispatch();
    let read = x.read(&mut h, x.atoms.clipboard, x.atoms.string, |h| w.sync(&mut h.wl));
    assert!(read.is_empty());
}

#[test]
fn test_x11_request_for_unadvertised_target_is_refused() {
    let mut h = Harness::new(&DataBridgeConfig::default());
    let x = h.x_client(Rect::new(0, 0, 100, 100));
    let mut w = h.wayland_client(Rect::new(200, 0, 100, 100));
    let source = w.set_selection(&mut h.wl, SelectionKind::Clipboard, &[("text/plain", &b"words"[..])]);
    h.dispatch();
    h.wl.set_keyboard_focus(Some(x.surface));

    let png = x.atom("image/png");
    let read = x.read(&mut h, x.atoms.clipboard, png, |h| w.sync(&mut h.wl));
    assert!(read.is_empty());
    assert_eq!(h.wl.selection(SelectionKind::Clipboard), Some(source));

    // The selection still serves what it does offer.
    let read = x.read(&mut h, x.atoms.clipboard, x.atoms.string, |h| w.sync(&mut h.wl));
    assert_eq!(read.bytes, b"words".to_vec());
}

#[test]
fn test_wayland_receive_of_unadvertised_mime_is_empty() {
    let mut h = Harness::new(&DataBridgeConfig::default());
    let x = h.x_client(Rect::new(0, 0, 100, 100));
    let mut w = h.wayland_client(Rect::new(200, 0, 100, 100));
    let mut owner = x.own(x.atoms.clipboard, vec![(x.atoms.utf8_string, b"text only".to_vec())], 1024);
    w.focus(&mut h.wl);
    let (offer, mimes) = h.wait_for("the X clipboard", |h| {
        x.serve(&mut owner);
        w.selection_offer(&mut h.wl, SelectionKind::Clipboard)
    });
    assert!(!mimes.contains(&"image/png".to_string()));

    let received = w.receive(&mut h, offer, "image/png", |_| x.serve(&mut owner));
    assert!(received.is_empty());
    assert!(owner.handler.rendered.is_empty());
}

#[test]
fn test_timestamp_of_wayland_selection_is_server_time() {
    let mut h = Harness::new(&DataBridgeConfig::default());
    let x = h.x_client(Rect::new(0, 0, 100, 100));
    let mut w = h.wayland_client(Rect::new(200, 0, 100, 100));
    // Claimed before the bridge has seen any X event time.
    w.set_selection(&mut h.wl, SelectionKind::Clipboard, &[("text/plain", &b"now"[..])]);
    h.dispatch();
    h.wl.set_keyboard_focus(Some(x.surface));

    let reply = x.read(&mut h, x.atoms.clipboard, x.atoms.timestamp, |_| {});
    let stamp = bytes_to_u32s(&reply.bytes);
    assert_eq!(stamp.len(), 1);
    assert_ne!(stamp[0], 0);
    assert!(stamp[0] <= h.display.time());
}

#[test]
fn test_primary_selection_is_bridged_both_ways() {
    let mut h = Harness::new(&DataBridgeConfig::default());
    let x = h.x_client(Rect::new(0, 0, 100, 100));
    let mut w = h.wayland_client(Rect::new(200, 0, 100, 100));

    w.set_selection(&mut h.wl, SelectionKind::Primary, &[("text/plain", &b"from wayland"[..])]);
    h.dispatch();
    h.wl.set_keyboard_focus(Some(x.surface));
    let read = x.read(&mut h, x.atoms.primary, x.atoms.text, |h| w.sync(&mut h.wl));
    assert_eq!(read.bytes, b"from wayland".to_vec());

    let mut owner = x.own(x.atoms.primary, vec![(x.atoms.utf8_string, b"from x".to_vec())], 1024);
    w.focus(&mut h.wl);
    let (offer, _) = h.wait_for("the X primary selection", |h| {
        x.serve(&mut owner);
        // Skip the offer of our own, now replaced, source.
        w.selection_offer(&mut h.wl, SelectionKind::Primary)
            .filter(|(_, mimes)| mimes == &["text/plain;charset=utf-8".to_string()])
    });
    assert_eq!(
        w.receive(&mut h, offer, "text/plain;charset=utf-8", |_| x.serve(&mut owner)),
        b"from x".to_vec()
    );
    // The clipboard was never touched.
    assert_eq!(h.wl.selection(SelectionKind::Clipboard), None);
}

#[test]
fn test_primary_is_left_alone_when_disabled() {
    let config = DataBridgeConfig { primary_selection: false, ..DataBridgeConfig::default() };
    let mut h = Harness::new(&config);
    let x = h.x_client(Rect::new(0, 0, 100, 100));
    let mut w = h.wayland_client(Rect::new(200, 0, 100, 100));
    assert_eq!(h.bridge.selection_window(SelectionKind::Primary), None);

    w.set_selection(&mut h.wl, SelectionKind::Primary, &[("text/plain", &b"local"[..])]);
    h.dispatch();
    assert_eq!(x.conn.get_selection_owner(x.atoms.primary).unwrap(), 0);
}

#[test]
fn test_x11_takeover_cancels_wayland_source() {
    let mut h = Harness::new(&DataBridgeConfig::default());
    let x = h.x_client(Rect::new(0, 0, 100, 100));
    let mut w = h.wayland_client(Rect::new(200, 0, 100, 100));
    let source = w.set_selection(&mut h.wl, SelectionKind::Clipboard, &[("text/plain", &b"old"[..])]);
    h.dispatch();

    let mut owner = x.own(x.atoms.clipboard, vec![(x.atoms.utf8_string, b"new".to_vec())], 1024);
    h.wait_for("the X clipboard", |h| {
        x.serve(&mut owner);
        h.wl.selection(SelectionKind::Clipboard).filter(|current| *current != source)
    });
    w.sync(&mut h.wl);
    assert_eq!(w.count(|event| matches!(event, DataDeviceEvent::SourceCancelled { source: s } if *s == source)), 1);
}

#[test]
fn test_stale_unset_keeps_x11_selection() {
    let mut h = Harness::new(&DataBridgeConfig::default());
    let x = h.x_client(Rect::new(0, 0, 100, 100));
    let mut w = h.wayland_client(Rect::new(200, 0, 100, 100));
    let mut owner = x.own(x.atoms.clipboard, vec![(x.atoms.utf8_string, b"x data".to_vec())], 1024);
    let serial = w.focus(&mut h.wl);
    let bridged = h.wait_for("the X clipboard", |h| {
        x.serve(&mut owner);
        h.wl.selection(SelectionKind::Clipboard)
    });

    assert!(!h.wl.set_selection(w.id, SelectionKind::Clipboard, None, serial).unwrap());
    h.dispatch();
    assert_eq!(h.wl.selection(SelectionKind::Clipboard), Some(bridged));
    assert_eq!(x.conn.get_selection_owner(x.atoms.clipboard).unwrap(), x.window);
}

#[test]
fn test_x11_owner_exit_clears_wayland_selection() {
    let mut h = Harness::new(&DataBridgeConfig::default());
    let x = h.x_client(Rect::new(0, 0, 100, 100));
    let mut w = h.wayland_client(Rect::new(200, 0, 100, 100));
    let mut owner = x.own(x.atoms.clipboard, vec![(x.atoms.utf8_string, b"bye".to_vec())], 1024);
    w.focus(&mut h.wl);
    h.wait_for("the X clipboard", |h| {
        x.serve(&mut owner);
        w.selection_offer(&mut h.wl, SelectionKind::Clipboard)
    });

    drop(x);
    h.dispatch();
    assert_eq!(h.wl.selection(SelectionKind::Clipboard), None);
    w.sync(&mut h.wl);
    assert!(matches!(
        w.events.last(),
        Some(DataDeviceEvent::Selection { kind: SelectionKind::Clipboard, offer: None })
    ));
}

#[test]
fn test_unresponsive_x11_owner_times_out() {
    let config = DataBridgeConfig { transfer_timeout_ms: 50, ..DataBridgeConfig::default() };
    let mut h = Harness::new(&config);
    let x = h.x_client(Rect::new(0, 0, 100, 100));
    let mut w = h.wayland_client(Rect::new(200, 0, 100, 100));
    let mut owner = x.own(x.atoms.clipboard, vec![(x.atoms.utf8_string, b"never".to_vec())], 1024);
    w.focus(&mut h.wl);
    let (offer, _) = h.wait_for("the X clipboard", |h| {
        x.serve(&mut owner);
        w.selection_offer(&mut h.wl, SelectionKind::Clipboard)
    });

    // The owner stops answering: the read ends empty once the conversion times out.
    let received = w.receive(&mut h, offer, "text/plain;charset=utf-8", |_| {});
    assert!(received.is_empty());
}
