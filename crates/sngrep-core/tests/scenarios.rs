//! End-to-end scenarios (spec §8): hand-built byte fixtures driven through
//! [`CaptureEngine`]/[`Storage`] directly, one fixture per scenario rather
//! than a mechanical encode/decode grid.

use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use sngrep_core::capture::queue::WorkItem;
use sngrep_core::dissect::link::Dlt;
use sngrep_core::storage::{Storage, StorageEvent};
use sngrep_core::{CaptureConfig, CaptureEngine, Frame, ProtocolId};

fn ipv4_header(total_len: u16, id: u16, flags_frag: u16, protocol: u8, src: [u8; 4], dst: [u8; 4]) -> Vec<u8> {
    let mut h = vec![0u8; 20];
    h[0] = 0x45;
    h[2..4].copy_from_slice(&total_len.to_be_bytes());
    h[4..6].copy_from_slice(&id.to_be_bytes());
    h[6..8].copy_from_slice(&flags_frag.to_be_bytes());
    h[8] = 64;
    h[9] = protocol;
    h[12..16].copy_from_slice(&src);
    h[16..20].copy_from_slice(&dst);
    h
}

fn udp_header(src_port: u16, dst_port: u16, body_len: usize) -> Vec<u8> {
    let mut h = vec![0u8; 8];
    h[0..2].copy_from_slice(&src_port.to_be_bytes());
    h[2..4].copy_from_slice(&dst_port.to_be_bytes());
    h[4..6].copy_from_slice(&((8 + body_len) as u16).to_be_bytes());
    h
}

/// A whole IPv4+UDP datagram, unfragmented, ready to enter the pipeline at
/// [`ProtocolId::Ip`].
fn ipv4_udp_datagram(src: [u8; 4], dst: [u8; 4], src_port: u16, dst_port: u16, body: &[u8]) -> Vec<u8> {
    let mut pkt = ipv4_header((20 + 8 + body.len()) as u16, 1, 0, 17, src, dst);
    pkt.extend_from_slice(&udp_header(src_port, dst_port, body.len()));
    pkt.extend_from_slice(body);
    pkt
}

fn tcp_header(src_port: u16, dst_port: u16, seq: u32) -> Vec<u8> {
    let mut h = vec![0u8; 20];
    h[0..2].copy_from_slice(&src_port.to_be_bytes());
    h[2..4].copy_from_slice(&dst_port.to_be_bytes());
    h[4..8].copy_from_slice(&seq.to_be_bytes());
    h[12] = 5 << 4;
    h
}

fn ipv4_tcp_datagram(src: [u8; 4], dst: [u8; 4], src_port: u16, dst_port: u16, seq: u32, body: &[u8]) -> Vec<u8> {
    let mut pkt = ipv4_header((20 + 20 + body.len()) as u16, 1, 0, 6, src, dst);
    pkt.extend_from_slice(&tcp_header(src_port, dst_port, seq));
    pkt.extend_from_slice(body);
    pkt
}

fn rtp_packet(seq: u16, ssrc: u32) -> Vec<u8> {
    let mut h = vec![0u8; 12];
    h[0] = 0x80;
    h[1] = 0; // PCMU
    h[2..4].copy_from_slice(&seq.to_be_bytes());
    h[4..8].copy_from_slice(&(seq as u32 * 160).to_be_bytes());
    h[8..12].copy_from_slice(&ssrc.to_be_bytes());
    h.extend_from_slice(&[0xffu8; 160]); // one PCMU frame of silence
    h
}

fn hep_chunk(vendor: u16, kind: u16, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&vendor.to_be_bytes());
    out.extend_from_slice(&kind.to_be_bytes());
    out.extend_from_slice(&((6 + value.len()) as u16).to_be_bytes());
    out.extend_from_slice(value);
    out
}

async fn send_ip(engine: &CaptureEngine, ts: u64, bytes: Vec<u8>) {
    engine
        .queue_sender()
        .send(WorkItem {
            input: "test".to_string(),
            root: ProtocolId::Ip,
            dlt: Dlt::Raw,
            frame: Frame::new(ts, bytes),
        })
        .await;
}

/// Scenario 1: INVITE / 100 / 180 / 200 / ACK / BYE / 200, one call, seven
/// messages, `Completed`, BYE's CSeq differs from INVITE's, no streams.
#[tokio::test]
async fn single_dialog_offline() {
    let mut engine = CaptureEngine::new(CaptureConfig::default());
    let a = [10, 0, 0, 1];
    let b = [10, 0, 0, 2];
    let call_id = "scenario1@example.com";

    let invite = format!(
        "INVITE sip:bob@example.com SIP/2.0\r\nCall-ID: {call_id}\r\nCSeq: 1 INVITE\r\nContent-Length: 0\r\n\r\n"
    );
    let trying = format!(
        "SIP/2.0 100 Trying\r\nCall-ID: {call_id}\r\nCSeq: 1 INVITE\r\nContent-Length: 0\r\n\r\n"
    );
    let ringing = format!(
        "SIP/2.0 180 Ringing\r\nCall-ID: {call_id}\r\nCSeq: 1 INVITE\r\nContent-Length: 0\r\n\r\n"
    );
    let ok_invite = format!(
        "SIP/2.0 200 OK\r\nCall-ID: {call_id}\r\nCSeq: 1 INVITE\r\nContent-Length: 0\r\n\r\n"
    );
    let ack = format!(
        "ACK sip:bob@example.com SIP/2.0\r\nCall-ID: {call_id}\r\nCSeq: 1 ACK\r\nContent-Length: 0\r\n\r\n"
    );
    let bye = format!(
        "BYE sip:alice@example.com SIP/2.0\r\nCall-ID: {call_id}\r\nCSeq: 2 BYE\r\nContent-Length: 0\r\n\r\n"
    );
    let ok_bye = format!(
        "SIP/2.0 200 OK\r\nCall-ID: {call_id}\r\nCSeq: 2 BYE\r\nContent-Length: 0\r\n\r\n"
    );

    send_ip(&engine, 1_000, ipv4_udp_datagram(a, b, 5060, 5060, invite.as_bytes())).await;
    send_ip(&engine, 2_000, ipv4_udp_datagram(b, a, 5060, 5060, trying.as_bytes())).await;
    send_ip(&engine, 3_000, ipv4_udp_datagram(b, a, 5060, 5060, ringing.as_bytes())).await;
    send_ip(&engine, 4_000, ipv4_udp_datagram(b, a, 5060, 5060, ok_invite.as_bytes())).await;
    send_ip(&engine, 5_000, ipv4_udp_datagram(a, b, 5060, 5060, ack.as_bytes())).await;
    send_ip(&engine, 6_000, ipv4_udp_datagram(a, b, 5060, 5060, bye.as_bytes())).await;
    send_ip(&engine, 7_000, ipv4_udp_datagram(b, a, 5060, 5060, ok_bye.as_bytes())).await;
    engine.close().await;

    let call = engine.storage().call(call_id).expect("call exists");
    assert_eq!(call.messages.len(), 7);
    assert_eq!(call.state(), sngrep_core::storage::CallState::Completed);
    assert!(call.streams.is_empty());
    let invite_cseq = call.messages[0].cseq;
    let bye_cseq = call.messages[5].cseq;
    assert_ne!(invite_cseq, bye_cseq);
    for pair in call.messages.windows(2) {
        assert!(pair[0].time <= pair[1].time);
    }
}

/// Scenario 2: INVITE/SDP offer, 200/SDP answer, ACK, then 100 RTP packets
/// each way. Two streams, each bound to the offer/answer address, PCMU,
/// consistent SSRC per stream.
#[tokio::test]
async fn invite_with_sdp_and_rtp() {
    let mut engine = CaptureEngine::new(CaptureConfig::default());
    let caller = [10, 0, 0, 1];
    let callee = [10, 0, 0, 2];
    let call_id = "scenario2@example.com";

    let offer_sdp = "v=0\r\no=- 1 1 IN IP4 10.0.0.1\r\ns=-\r\nc=IN IP4 10.0.0.1\r\nt=0 0\r\nm=audio 40000 RTP/AVP 0\r\na=rtpmap:0 PCMU/8000\r\n";
    let invite = format!(
        "INVITE sip:bob@example.com SIP/2.0\r\nCall-ID: {call_id}\r\nCSeq: 1 INVITE\r\nContent-Type: application/sdp\r\nContent-Length: {}\r\n\r\n{}",
        offer_sdp.len(),
        offer_sdp
    );
    let answer_sdp = "v=0\r\no=- 1 1 IN IP4 10.0.0.2\r\ns=-\r\nc=IN IP4 10.0.0.2\r\nt=0 0\r\nm=audio 40002 RTP/AVP 0\r\na=rtpmap:0 PCMU/8000\r\n";
    let ok = format!(
        "SIP/2.0 200 OK\r\nCall-ID: {call_id}\r\nCSeq: 1 INVITE\r\nContent-Type: application/sdp\r\nContent-Length: {}\r\n\r\n{}",
        answer_sdp.len(),
        answer_sdp
    );
    let ack = format!(
        "ACK sip:bob@example.com SIP/2.0\r\nCall-ID: {call_id}\r\nCSeq: 1 ACK\r\nContent-Length: 0\r\n\r\n"
    );

    send_ip(&engine, 1_000, ipv4_udp_datagram(caller, callee, 5060, 5060, invite.as_bytes())).await;
    send_ip(&engine, 2_000, ipv4_udp_datagram(callee, caller, 5060, 5060, ok.as_bytes())).await;
    send_ip(&engine, 3_000, ipv4_udp_datagram(caller, callee, 5060, 5060, ack.as_bytes())).await;

    const CALLER_SSRC: u32 = 0x1111_1111;
    const CALLEE_SSRC: u32 = 0x2222_2222;
    for seq in 0..100u16 {
        let ts = 10_000 + seq as u64;
        // Callee -> caller's advertised receiving address (10.0.0.1:40000).
        send_ip(&engine, ts, ipv4_udp_datagram(callee, caller, 40002, 40000, &rtp_packet(seq, CALLEE_SSRC))).await;
        // Caller -> callee's advertised receiving address (10.0.0.2:40002).
        send_ip(&engine, ts, ipv4_udp_datagram(caller, callee, 40000, 40002, &rtp_packet(seq, CALLER_SSRC))).await;
    }
    engine.close().await;

    let call = engine.storage().call(call_id).expect("call exists");
    assert_eq!(call.streams.len(), 2);
    for stream in &call.streams {
        assert!(stream.confirmed);
        assert_eq!(stream.packet_count, 100);
        assert_eq!(stream.rtpmap.first().map(|(_, name)| name.as_str()), Some("PCMU/8000"));
    }
    let to_caller = call
        .streams
        .iter()
        .find(|s| s.dst.port() == 40000)
        .expect("stream toward caller");
    assert_eq!(to_caller.src.as_ref().map(|a| a.port()), Some(40002));
    assert_eq!(to_caller.ssrc, Some(CALLEE_SSRC));

    let to_callee = call
        .streams
        .iter()
        .find(|s| s.dst.port() == 40002)
        .expect("stream toward callee");
    assert_eq!(to_callee.src.as_ref().map(|a| a.port()), Some(40000));
    assert_eq!(to_callee.ssrc, Some(CALLER_SSRC));
}

/// Scenario 3: a ~2500-byte SIP INVITE split into three out-of-order IPv4
/// fragments. One `Message`, SDP parsed, stream registered, three frames.
#[tokio::test]
async fn ip_fragmentation_reassembles_out_of_order() {
    let mut engine = CaptureEngine::new(CaptureConfig::default());
    let a = [10, 0, 0, 1];
    let b = [10, 0, 0, 2];
    let call_id = "scenario3@example.com";

    let sdp = "v=0\r\no=- 1 1 IN IP4 10.0.0.1\r\ns=-\r\nc=IN IP4 10.0.0.1\r\nt=0 0\r\nm=audio 40000 RTP/AVP 0\r\na=rtpmap:0 PCMU/8000\r\n";
    let padding = "a".repeat(2200);
    let invite = format!(
        "INVITE sip:bob@example.com SIP/2.0\r\nCall-ID: {call_id}\r\nCSeq: 1 INVITE\r\nContent-Type: application/sdp\r\nX-Pad: {padding}\r\nContent-Length: {}\r\n\r\n{}",
        sdp.len(),
        sdp
    );

    let mut datagram = udp_header(5060, 5060, invite.len());
    datagram.extend_from_slice(invite.as_bytes());
    assert!(datagram.len() > 2400, "fixture should exceed a single fragment");

    let f1_end = 800usize;
    let f2_end = 1600usize;
    let frag1 = &datagram[0..f1_end];
    let frag2 = &datagram[f1_end..f2_end];
    let frag3 = &datagram[f2_end..];

    let id = 42u16;
    let mut pkt_last = ipv4_header((20 + frag3.len()) as u16, id, (f2_end / 8) as u16, 17, a, b);
    pkt_last.extend_from_slice(frag3);
    let mut pkt_first = ipv4_header((20 + frag1.len()) as u16, id, 0x2000, 17, a, b);
    pkt_first.extend_from_slice(frag1);
    let mut pkt_middle = ipv4_header((20 + frag2.len()) as u16, id, 0x2000 | (f1_end / 8) as u16, 17, a, b);
    pkt_middle.extend_from_slice(frag2);

    // Out of order: last fragment first, then first, then middle.
    send_ip(&engine, 1_000, pkt_last).await;
    send_ip(&engine, 2_000, pkt_first).await;
    send_ip(&engine, 3_000, pkt_middle).await;
    engine.close().await;

    let call = engine.storage().call(call_id).expect("call exists");
    assert_eq!(call.messages.len(), 1);
    assert_eq!(call.messages[0].packet.frame_count(), 3);
    assert_eq!(call.streams.len(), 1);
    assert_eq!(call.streams[0].rtpmap.first().map(|(_, n)| n.as_str()), Some("PCMU/8000"));
}

/// Scenario 4: a SIP INVITE (`Content-Length: 400`) split across two TCP
/// segments. No message after the first; one after the second. A third
/// segment starting a fresh INVITE accumulates normally.
#[tokio::test]
async fn tcp_reassembly_waits_for_full_content_length() {
    let mut engine = CaptureEngine::new(CaptureConfig::default());
    let a = [10, 0, 0, 1];
    let b = [10, 0, 0, 2];
    let call_id = "scenario4@example.com";

    let body = "x".repeat(400);
    let invite = format!(
        "INVITE sip:bob@example.com SIP/2.0\r\nCall-ID: {call_id}\r\nCSeq: 1 INVITE\r\nContent-Length: 400\r\n\r\n{body}"
    );
    let bytes = invite.into_bytes();
    let split = bytes.len() - 100;
    let (first_seg, second_seg) = bytes.split_at(split);

    send_ip(&engine, 1_000, ipv4_tcp_datagram(a, b, 51000, 5060, 1, first_seg)).await;
    engine.close().await;
    assert!(engine.storage().call(call_id).is_none(), "no message until Content-Length is satisfied");

    let mut engine = CaptureEngine::new(CaptureConfig::default());
    send_ip(&engine, 1_000, ipv4_tcp_datagram(a, b, 51000, 5060, 1, first_seg)).await;
    send_ip(&engine, 2_000, ipv4_tcp_datagram(a, b, 51000, 5060, 1 + first_seg.len() as u32, second_seg)).await;

    let call_id_2 = "scenario4b@example.com";
    let invite2 = format!(
        "INVITE sip:bob@example.com SIP/2.0\r\nCall-ID: {call_id_2}\r\nCSeq: 1 INVITE\r\nContent-Length: 0\r\n\r\n"
    );
    send_ip(
        &engine,
        3_000,
        ipv4_tcp_datagram(a, b, 51000, 5060, 1 + bytes.len() as u32, invite2.as_bytes()),
    )
    .await;
    engine.close().await;

    let call = engine.storage().call(call_id).expect("first call completes");
    assert_eq!(call.messages.len(), 1);
    assert_eq!(call.messages[0].packet.frame_count(), 2);

    let call2 = engine.storage().call(call_id_2).expect("second invite accumulates normally");
    assert_eq!(call2.messages.len(), 1);
}

/// Scenario 5: an HEP3 datagram carrying the scenario-1 INVITE with a
/// matching auth key. The resulting message's time comes from the HEP
/// timestamp chunks, not from the frame's arrival timestamp.
#[tokio::test]
async fn hep3_ingest_uses_chunk_timestamp() {
    let mut config = CaptureConfig::default();
    config.hep_auth_key = Some("topsecret".to_string());
    let mut engine = CaptureEngine::new(config);

    let call_id = "scenario5@example.com";
    let invite = format!(
        "INVITE sip:bob@example.com SIP/2.0\r\nCall-ID: {call_id}\r\nCSeq: 1 INVITE\r\nContent-Length: 0\r\n\r\n"
    );

    let sec = 1_700_000_000u32;
    let usec = 250_000u32;
    let mut body = Vec::new();
    body.extend_from_slice(b"HEP3");
    body.extend_from_slice(&[0u8; 2]);
    body.extend(hep_chunk(0, 2, &[17]));
    body.extend(hep_chunk(0, 3, &[10, 0, 0, 1]));
    body.extend(hep_chunk(0, 4, &[10, 0, 0, 2]));
    body.extend(hep_chunk(0, 7, &5060u16.to_be_bytes()));
    body.extend(hep_chunk(0, 8, &5060u16.to_be_bytes()));
    body.extend(hep_chunk(0, 9, &sec.to_be_bytes()));
    body.extend(hep_chunk(0, 10, &usec.to_be_bytes()));
    body.extend(hep_chunk(0, 11, &[1]));
    body.extend(hep_chunk(0, 14, b"topsecret"));
    body.extend(hep_chunk(0, 15, invite.as_bytes()));

    let arrival_ts = 999_999_999_999u64;
    engine
        .queue_sender()
        .send(WorkItem {
            input: "hep".to_string(),
            root: ProtocolId::Hep,
            dlt: Dlt::Raw,
            frame: Frame::new(arrival_ts, body),
        })
        .await;
    engine.close().await;

    let call = engine.storage().call(call_id).expect("call exists");
    assert_eq!(call.messages.len(), 1);
    let expected_time = sngrep_core::time::from_sec_usec(sec, usec);
    assert_eq!(call.messages[0].time, expected_time);
    assert_ne!(call.messages[0].time, arrival_ts);
}

/// Scenario 6: `max_dialogs=3`, five distinct calls one second apart.
/// Final store retains calls 3, 4, 5; `CallEvicted` fires twice.
#[tokio::test]
async fn eviction_keeps_most_recent_dialogs() {
    let mut config = CaptureConfig::default();
    config.max_dialogs = 3;
    let storage = Storage::new(config);

    let evicted: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let evicted2 = evicted.clone();
    storage.subscribe(move |event| {
        if let StorageEvent::CallEvicted(id) = event {
            evicted2.lock().unwrap().push(id.to_string());
        }
    });

    for i in 1..=5u64 {
        let call_id = format!("call-{i}");
        let packet = sngrep_core::Packet::new(
            "test",
            Dlt::Raw,
            Frame::new(i * 1_000_000, vec![]),
        );
        packet.set_protocol_data(
            ProtocolId::Ip,
            sngrep_core::packet::ProtoData::Ip(sngrep_core::dissect::ip::IpData {
                version: 4,
                protocol: 17,
                src: IpAddr::from([10, 0, 0, 1]),
                dst: IpAddr::from([10, 0, 0, 2]),
                header_len: 20,
                total_len: 0,
                reassembled: false,
            }),
        );
        packet.set_protocol_data(
            ProtocolId::Udp,
            sngrep_core::packet::ProtoData::Udp(sngrep_core::dissect::udp::UdpData {
                src_port: 5060,
                dst_port: 5060,
                length: 0,
            }),
        );
        packet.set_protocol_data(
            ProtocolId::Sip,
            sngrep_core::packet::ProtoData::Sip(sngrep_core::dissect::sip::SipData {
                is_request: true,
                method: Some(sngrep_core::dissect::sip::SipMethod::Invite),
                status_code: None,
                call_id: call_id.clone(),
                from_tag: None,
                to_tag: None,
                cseq: Some(1),
                cseq_method: Some("INVITE".to_string()),
                via_branch: None,
                x_call_id: None,
                content_type: None,
                body_offset: 0,
                body_len: 0,
                raw: bytes::Bytes::from_static(b"INVITE sip:x SIP/2.0\r\n"),
            }),
        );
        storage.ingest_sip(&packet);
    }

    let stats = storage.stats();
    assert_eq!(stats.call_count, 3);
    assert!(storage.call("call-1").is_none());
    assert!(storage.call("call-2").is_none());
    assert!(storage.call("call-3").is_some());
    assert!(storage.call("call-4").is_some());
    assert!(storage.call("call-5").is_some());
    assert_eq!(evicted.lock().unwrap().len(), 2);
}
