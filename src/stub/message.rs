//! Composing queries and reading responses.

use crate::error::Failure;
use domain::base::iana::Rcode;
use domain::base::{Message, MessageBuilder, Name, ParsedName, Rtype};
use domain::rdata::{Aaaa, Ptr, A};
use std::fmt::Write;
use std::net::IpAddr;
use std::str::FromStr;

//------------ Question ------------------------------------------------------

/// The kind of question asked in a single exchange.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Question {
    /// IPv4 addresses of a host.
    A,

    /// IPv6 addresses of a host.
    Aaaa,

    /// The host name for an address.
    Ptr,
}

impl Question {
    /// Returns the record type asked for.
    pub fn rtype(self) -> Rtype {
        match self {
            Question::A => Rtype::A,
            Question::Aaaa => Rtype::AAAA,
            Question::Ptr => Rtype::PTR,
        }
    }
}

//------------ Composing -----------------------------------------------------

/// Converts a host name into an absolute domain name.
pub fn host_name(name: &str) -> Result<Name<Vec<u8>>, Failure> {
    if name.is_empty() {
        return Err(Failure::BadName);
    }
    Name::from_str(name).map_err(|_| Failure::BadName)
}

/// Returns the domain name for the reverse lookup of `addr`.
///
/// This is a name under `in-addr.arpa.` for IPv4 and under `ip6.arpa.` for
/// IPv6 addresses.
pub fn reverse_name(addr: IpAddr) -> Result<Name<Vec<u8>>, Failure> {
    let mut res = String::with_capacity(72);
    // Writing to a string can’t fail.
    match addr {
        IpAddr::V4(addr) => {
            for octet in addr.octets().iter().rev() {
                let _ = write!(res, "{}.", octet);
            }
            res.push_str("in-addr.arpa.");
        }
        IpAddr::V6(addr) => {
            for octet in addr.octets().iter().rev() {
                let _ = write!(res, "{:x}.{:x}.", octet & 0x0f, octet >> 4);
            }
            res.push_str("ip6.arpa.");
        }
    }
    Name::from_str(&res).map_err(|_| Failure::BadName)
}

/// Creates a query message with recursion desired.
pub fn compose(
    id: u16,
    qname: &Name<Vec<u8>>,
    question: Question,
) -> Result<Message<Vec<u8>>, Failure> {
    let mut msg = MessageBuilder::new_vec();
    msg.header_mut().set_id(id);
    msg.header_mut().set_rd(true);
    let mut msg = msg.question();
    msg.push((qname, question.rtype()))
        .map_err(|_| Failure::BadName)?;
    Ok(msg.into_message())
}

//------------ Reading -------------------------------------------------------

/// Reads what a response has to say about a question.
///
/// For address questions, the addresses in the answer section are
/// returned. For a PTR question, the result contains one element per PTR
/// record found. Records of other types, such as the CNAMEs leading to
/// the addresses, are skipped.
pub fn read_answer(
    response: &Message<Vec<u8>>,
    question: Question,
) -> Result<Vec<String>, Failure> {
    rcode_result(response.header().rcode())?;
    let answer = response.answer().map_err(|_| Failure::FormatError)?;
    let mut res = Vec::new();
    match question {
        Question::A => {
            for record in answer.limit_to::<A>() {
                let record = record.map_err(|_| Failure::FormatError)?;
                res.push(record.data().addr().to_string());
            }
        }
        Question::Aaaa => {
            for record in answer.limit_to::<Aaaa>() {
                let record = record.map_err(|_| Failure::FormatError)?;
                res.push(record.data().addr().to_string());
            }
        }
        Question::Ptr => {
            for record in answer.limit_to::<Ptr<ParsedName<_>>>() {
                let record = record.map_err(|_| Failure::FormatError)?;
                res.push(record.data().ptrdname().to_string());
            }
        }
    }
    Ok(res)
}

/// Translates a response code into a failure.
pub fn rcode_result(rcode: Rcode) -> Result<(), Failure> {
    if rcode == Rcode::NOERROR {
        Ok(())
    } else if rcode == Rcode::NXDOMAIN {
        Err(Failure::NotFound)
    } else if rcode == Rcode::SERVFAIL {
        Err(Failure::ServerFailure)
    } else if rcode == Rcode::REFUSED {
        Err(Failure::Refused)
    } else if rcode == Rcode::FORMERR {
        Err(Failure::FormatError)
    } else {
        Err(Failure::ServerFailure)
    }
}

//============ Testing =======================================================
