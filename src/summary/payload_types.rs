/// HEP payload type codes and their display labels.
const PAYLOAD_TYPES: &[(i64, &str, &str)] = &[
    (0, "Generic", "generic"),
    (1, "SIP", "sip"),
    (2, "XMPP", "xmpp"),
    (3, "SDP", "sdp"),
    (4, "RTP", "rtp"),
    (5, "RTCP", "rtcp"),
    (6, "MGCP", "mgcp"),
    (7, "MEGACO", "megaco"),
    (8, "M2UA", "m2ua"),
    (9, "M3UA", "m3ua"),
    (10, "IAX", "iax"),
    (11, "H322", "h322"),
    (12, "H321", "h321"),
    (13, "M2PA", "m2pa"),
    (34, "MOS full report", "mos full report"),
    (35, "MOS short report", "mos short report"),
    (50, "SIP JSON", "sip json"),
    (53, "DNS JSON", "dns json"),
    (54, "M3UA JSON", "m3ua json"),
    (55, "RTSP", "rtsp"),
    (56, "DIAMETER", "diameter"),
    (57, "GSM MAP", "gsm map"),
    (58, "RTCP PION", "rtcp pion"),
    (60, "CDR", "cdr"),
    (100, "LOG", "log"),
];

/// `(method, method_text)` for a payload type; unknown codes are generic.
pub fn payload_label(code: i64) -> (&'static str, &'static str) {
    PAYLOAD_TYPES
        .iter()
        .find(|(c, _, _)| *c == code)
        .map(|(_, method, text)| (*method, *text))
        .unwrap_or(("Generic", "generic"))
}
