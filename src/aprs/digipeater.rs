/*! WIDEn-N digipeating.

Subscribes to an [`AprsInterface`]'s received-frame signal and edits
the digipeater path of anything eligible: frames explicitly routed
through one of our aliases get that slot rewritten with our callsign
and the H bit set, and `WIDEn-N` flood paths are consumed one hop at a
time, our callsign inserted before the decremented alias. The APRS
interface's deduplication is what keeps this from looping.
*/
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::OnceLock;

use log::debug;
use regex::Regex;

use crate::address::{AX25Address, AX25Path};
use crate::aprs::interface::{AprsEvent, AprsInterface};
use crate::frame::{AX25Frame, AX25FrameHeader};

fn wide_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^WIDE(\d)$").unwrap())
}

struct DigiInner {
    aprs: AprsInterface,
    mycall: AX25Address,
    mydigi: HashSet<AX25Address>,
}

/// A WIDEn-N digipeater bound to one APRS interface.
#[derive(Clone)]
pub struct AprsDigipeater {
    inner: Rc<RefCell<DigiInner>>,
}

impl AprsDigipeater {
    /// Create a digipeater answering to `aliases` in addition to the
    /// interface's own callsign.
    pub fn new(aprs: &AprsInterface, aliases: impl IntoIterator<Item = AX25Address>) -> Self {
        let mycall = aprs.mycall();
        let mydigi: HashSet<AX25Address> = aliases
            .into_iter()
            .map(|a| a.normalised())
            .chain([mycall.clone()])
            .collect();
        let digi = Self {
            inner: Rc::new(RefCell::new(DigiInner {
                aprs: aprs.clone(),
                mycall,
                mydigi,
            })),
        };
        let weak = Rc::downgrade(&digi.inner);
        aprs.received().connect(move |event: &AprsEvent| {
            if let Some(inner) = weak.upgrade() {
                on_receive(&inner, &event.frame);
            }
        });
        digi
    }

    /// The aliases this digipeater answers to.
    #[must_use]
    pub fn aliases(&self) -> Vec<AX25Address> {
        self.inner.borrow().mydigi.iter().cloned().collect()
    }
}

fn retransmit(inner: &Rc<RefCell<DigiInner>>, frame: &AX25Frame, path: AX25Path) {
    let digi = inner.borrow();
    debug!("digipeating {frame} via {path}");
    let header = AX25FrameHeader::new_with_src_cr(
        frame.header.destination.clone(),
        frame.header.source.clone(),
        path,
        frame.header.cr,
        frame.header.src_cr,
    );
    digi.aprs.transmit(AX25Frame::new(header, frame.body.clone()));
}

fn on_receive(inner: &Rc<RefCell<DigiInner>>, frame: &AX25Frame) {
    let (mycall, mydigi) = {
        let digi = inner.borrow();
        (digi.mycall.clone(), digi.mydigi.clone())
    };
    let repeaters = &frame.header.repeaters;

    let mut prev: Option<&AX25Address> = None;
    for (idx, digi) in repeaters.iter().enumerate() {
        if mydigi.contains(&digi.normalised()) {
            // Explicitly routed through one of our aliases. Repeat it
            // only if it's our turn: every earlier hop used, ours not.
            if prev.is_none_or(AX25Address::ch) && !digi.ch() {
                let path = repeaters.replace(digi, &mycall.with_ch(true));
                retransmit(inner, frame, path);
            }
            return;
        }
        if let Some(m) = wide_re().captures(digi.callsign()) {
            if digi.ch() {
                // A spent WIDEn entry; keep looking.
                prev = Some(digi);
                continue;
            }
            let n: u8 = m[1].parse().unwrap_or(0);
            let rem_hops = digi.ssid().min(n);
            if rem_hops == 0 {
                // Hop count expired.
                debug!("not digipeating, hops expired: {frame}");
                return;
            }
            let mut path: Vec<AX25Address> = repeaters[..idx].to_vec();
            path.push(mycall.with_ch(true));
            if rem_hops > 1 {
                path.push(digi.with_ssid(rem_hops - 1).with_ch(false));
            }
            path.extend(repeaters[idx + 1..].iter().cloned());
            retransmit(inner, frame, AX25Path::new(path));
            return;
        }
        prev = Some(digi);
    }
    // Nothing in the path concerns us.
}
