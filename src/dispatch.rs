//! Reply tables and frame matching.
//!
//! Each phone module carries a static, ordered table describing which
//! frames it can interpret and in which request context. The same pattern
//! language serves user-registered tables, which are consulted first.

use crate::error::Error;
use crate::protocol::Message;
use crate::state::StateMachine;

/// Which high-level operation is waiting for a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestId {
    /// Nothing pending; also used for fire-and-forget sends.
    #[default]
    None,
    /// Wildcard waiter: any dispatched frame completes the wait.
    EachFrame,
    /// Entry marker for frames the phone pushes unsolicited.
    IncomingFrame,
    Initialise,
    Terminate,
    GetModel,
    GetManufacturer,
    GetFirmware,
    GetImei,
    GetHardware,
    GetProductCode,
    GetDateTime,
    SetDateTime,
    ShowStartInfo,
    /// Reserved for user reply tables.
    User,
}

/// How a reply entry recognises its frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePattern {
    /// Protocols with wide numeric ids (S60): match on the message type
    /// alone.
    LongId(u8),
    /// Binary frames (Nokia): match on the type byte, optionally requiring
    /// one payload byte at a fixed position.
    SingleByte {
        msg_type: u8,
        /// `(position, value)` of a required subtype byte.
        subtype: Option<(usize, u8)>,
    },
    /// Text-ish frames (AT): match when the payload starts with, and is
    /// longer than, the given prefix.
    Prefix(&'static [u8]),
}

impl FramePattern {
    pub(crate) fn matches(&self, msg: &Message) -> bool {
        match self {
            FramePattern::LongId(id) => *id == msg.msg_type,
            FramePattern::SingleByte { msg_type, subtype } => {
                *msg_type == msg.msg_type
                    && match subtype {
                        None => true,
                        // A subtype position is accepted up to and
                        // including one past the payload, where the frame
                        // buffer reads as zero fill.
                        Some((position, value)) => match msg.buffer.get(*position) {
                            Some(byte) => byte == value,
                            None if *position == msg.len() => *value == 0,
                            None => false,
                        },
                    }
            }
            FramePattern::Prefix(prefix) => {
                msg.len() > prefix.len() && msg.buffer.starts_with(prefix)
            }
        }
    }
}

/// One row of a phone module's reply table.
pub struct ReplyEntry<P: ?Sized> {
    pub pattern: FramePattern,
    pub request: RequestId,
    pub handler: fn(&mut P, &Message, &mut StateMachine) -> Result<(), Error>,
}

/// One row of a user-registered reply table.
#[derive(Clone, Copy)]
pub struct UserReplyEntry {
    pub pattern: FramePattern,
    pub request: RequestId,
    pub handler: fn(&Message, &mut StateMachine) -> Result<(), Error>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TableMatch {
    /// Index of the first entry that matched in the current request
    /// context.
    Hit(usize),
    /// Some entry recognised the frame, but none in the current context.
    NotRequested,
    NoMatch,
}

/// First-match scan with the request preference: an entry wins outright
/// when it is bound to the awaited request, marked as incoming, or when
/// the waiter accepts every frame.
pub(crate) fn scan<'a, I>(entries: I, msg: &Message, current: RequestId) -> TableMatch
where
    I: Iterator<Item = (&'a FramePattern, RequestId)>,
{
    let mut available = false;
    for (index, (pattern, request)) in entries.enumerate() {
        if !pattern.matches(msg) {
            continue;
        }
        if request == RequestId::IncomingFrame
            || request == current
            || current == RequestId::EachFrame
        {
            return TableMatch::Hit(index);
        }
        available = true;
    }
    if available {
        TableMatch::NotRequested
    } else {
        TableMatch::NoMatch
    }
}

/// Runs the winning handler and settles the pending request: anything but
/// `NeedAnotherAnswer` from an entry bound to the awaited request clears
/// it and becomes the waiter's outcome.
fn settle(
    s: &mut StateMachine,
    entry_request: RequestId,
    result: Result<(), Error>,
) -> Result<(), Error> {
    if entry_request == s.phone_data().request_id {
        if let Err(Error::NeedAnotherAnswer) = result {
            return Ok(());
        }
        s.phone_data_mut().request_id = RequestId::None;
    }
    result
}

/// Dispatches `msg` against a module reply table.
pub fn run_table<P>(
    module: &mut P,
    table: &[ReplyEntry<P>],
    msg: &Message,
    s: &mut StateMachine,
) -> Result<(), Error> {
    let current = s.phone_data().request_id;
    match scan(table.iter().map(|e| (&e.pattern, e.request)), msg, current) {
        TableMatch::NoMatch => Err(Error::UnknownFrame),
        TableMatch::NotRequested => Err(Error::FrameNotRequested),
        TableMatch::Hit(index) => {
            let entry = &table[index];
            let result = (entry.handler)(module, msg, s);
            settle(s, entry.request, result)
        }
    }
}

/// Dispatches `msg` against the user reply table.
pub(crate) fn run_user_table(
    table: &[UserReplyEntry],
    msg: &Message,
    s: &mut StateMachine,
) -> Result<(), Error> {
    let current = s.phone_data().request_id;
    match scan(table.iter().map(|e| (&e.pattern, e.request)), msg, current) {
        TableMatch::NoMatch => Err(Error::UnknownFrame),
        TableMatch::NotRequested => Err(Error::FrameNotRequested),
        TableMatch::Hit(index) => {
            let entry = table[index];
            let result = (entry.handler)(msg, s);
            settle(s, entry.request, result)
        }
    }
}
