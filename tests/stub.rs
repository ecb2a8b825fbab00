//! Tests for the stub engine against a scripted server on loopback.

mod common;

use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use domain::base::iana::{Class, Rcode};
use domain::base::{Message, MessageBuilder, Name, Rtype, Ttl};
use domain::rdata::{Aaaa, Ptr, A};
use parking_lot::Mutex;
use rstest::rstest;

use common::{channel, collect, init_logging};
use resolv_loop::stub::conf::StubConf;
use resolv_loop::stub::StubEngine;
use resolv_loop::{
    Failure, Family, LookupResult, Resolver, Submission, WorkSource,
};

//----------- Scripted Server ------------------------------------------------

/// A DNS server answering from a fixed script.
///
/// * `host.example.test` has one A and one AAAA address,
/// * `v4only.example.test` has an A address only,
/// * `gone.example.test` doesn’t exist,
/// * `broken.example.test` results in a server failure,
/// * `refused.example.test` is refused,
/// * `spoofed.example.test` first gets an answer with the wrong ID,
/// * `silent.example.test` never gets an answer,
/// * `late.example.test` has an A address but the answer takes 300ms,
/// * `192.0.2.1` has a PTR record, `192.0.2.99` has none.
struct Server {
    addr: SocketAddr,
    queries: Arc<AtomicUsize>,
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Server {
    fn start() -> Self {
        let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
        sock.set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        let addr = sock.local_addr().unwrap();
        let queries = Arc::new(AtomicUsize::new(0));
        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let queries = queries.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let mut buf = vec![0; 2048];
                while !stop.load(Ordering::SeqCst) {
                    let (len, peer) = match sock.recv_from(&mut buf) {
                        Ok(some) => some,
                        Err(_) => continue,
                    };
                    let query =
                        match Message::from_octets(buf[..len].to_vec()) {
                            Ok(query) => query,
                            Err(_) => continue,
                        };
                    queries.fetch_add(1, Ordering::SeqCst);
                    let responses = respond(&query);
                    if is_late(&query) {
                        let sock = sock.try_clone().unwrap();
                        thread::spawn(move || {
                            thread::sleep(LATE_DELAY);
                            for response in responses {
                                // The client may be gone by now.
                                let _ = sock.send_to(&response, peer);
                            }
                        });
                        continue;
                    }
                    for response in responses {
                        sock.send_to(&response, peer).unwrap();
                    }
                }
            })
        };
        Server {
            addr,
            queries,
            stop,
            thread: Some(thread),
        }
    }

    fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// How long the answers to `late.example.test` take.
const LATE_DELAY: Duration = Duration::from_millis(300);

fn is_late(query: &Message<Vec<u8>>) -> bool {
    query.first_question().map_or(false, |question| {
        question
            .qname()
            .to_string()
            .trim_end_matches('.')
            .eq_ignore_ascii_case("late.example.test")
    })
}

/// Returns the responses to send for a query.
fn respond(query: &Message<Vec<u8>>) -> Vec<Vec<u8>> {
    let question = query.first_question().unwrap();
    let qname = question.qname().to_string();
    let qname = qname.trim_end_matches('.').to_ascii_lowercase();
    let qtype = question.qtype();

    let rcode = match qname.as_str() {
        "silent.example.test" => return Vec::new(),
        "gone.example.test" => Rcode::NXDOMAIN,
        "broken.example.test" => Rcode::SERVFAIL,
        "refused.example.test" => Rcode::REFUSED,
        _ => Rcode::NOERROR,
    };
    let mut answer = MessageBuilder::new_vec()
        .start_answer(query, rcode)
        .unwrap();
    let owner = question.qname();
    let ttl = Ttl::from_secs(60);
    let name = qname.as_str();
    if qtype == Rtype::A
        && matches!(
            name,
            "host.example.test"
                | "v4only.example.test"
                | "spoofed.example.test"
                | "late.example.test"
        )
    {
        let addr = A::new("192.0.2.1".parse().unwrap());
        answer.push((owner, Class::IN, ttl, addr)).unwrap();
    } else if qtype == Rtype::AAAA && name == "host.example.test" {
        let addr = Aaaa::new("2001:db8::1".parse().unwrap());
        answer.push((owner, Class::IN, ttl, addr)).unwrap();
    } else if qtype == Rtype::PTR && name == "1.2.0.192.in-addr.arpa" {
        let target = Name::<Vec<u8>>::from_str("host.example.test").unwrap();
        answer
            .push((owner, Class::IN, ttl, Ptr::new(target)))
            .unwrap();
    }
    let response = answer.finish();

    if qname == "spoofed.example.test" {
        let mut spoofed = response.clone();
        // Flip the ID.
        spoofed[0] ^= 0xff;
        vec![spoofed, response]
    } else {
        vec![response]
    }
}

//----------- Helpers --------------------------------------------------------

fn conf(servers: &[SocketAddr]) -> StubConf {
    let mut conf = StubConf::new();
    conf.servers.extend_from_slice(servers);
    conf.set_timeout(Duration::from_millis(100));
    conf.set_attempts(2);
    conf
}

fn resolver(servers: &[SocketAddr]) -> Resolver {
    init_logging();
    Resolver::from_conf(conf(servers)).unwrap()
}

/// Returns an address nobody listens on.
fn closed_port() -> SocketAddr {
    let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
    sock.local_addr().unwrap()
}

//----------- Tests ----------------------------------------------------------

#[rstest]
#[case::both("host.example.test", Family::Any, Ok(vec!["192.0.2.1", "2001:db8::1"]))]
#[case::v4("host.example.test", Family::V4, Ok(vec!["192.0.2.1"]))]
#[case::v6("host.example.test", Family::V6, Ok(vec!["2001:db8::1"]))]
#[case::v4_only("v4only.example.test", Family::Any, Ok(vec!["192.0.2.1"]))]
#[case::nxdomain("gone.example.test", Family::Any, Err(Failure::NotFound))]
#[case::servfail(
    "broken.example.test",
    Family::V4,
    Err(Failure::ServerFailure)
)]
#[case::refused("refused.example.test", Family::V4, Err(Failure::Refused))]
#[case::spoofed("spoofed.example.test", Family::V4, Ok(vec!["192.0.2.1"]))]
#[case::reverse("192.0.2.1", Family::Any, Ok(vec!["192.0.2.1"]))]
#[case::reverse_without_ptr("192.0.2.99", Family::Any, Err(Failure::NotFound))]
#[case::bad_name("a..example.test", Family::Any, Err(Failure::BadName))]
fn lookups(
    #[case] request: &str,
    #[case] family: Family,
    #[case] expected: Result<Vec<&str>, Failure>,
) {
    let server = Server::start();
    let resolver = resolver(&[server.addr]);
    let (callback, rx) = channel();
    resolver.submit_with_family(request, family, callback());
    resolver.run();
    let expected: LookupResult =
        expected.map(|addrs| addrs.into_iter().map(String::from).collect());
    assert_eq!(collect(&rx), vec![expected]);
}

#[test]
fn stub_engine_is_the_default() {
    let server = Server::start();
    let resolver: Resolver<StubEngine> = resolver(&[server.addr]);
    let (callback, rx) = channel();
    resolver.submit_with_family("v4only.example.test", Family::V4, callback());
    resolver.run();
    assert_eq!(collect(&rx), vec![Ok(vec!["192.0.2.1".to_string()])]);
}

#[test]
fn many_lookups_in_one_run() {
    let server = Server::start();
    let resolver = resolver(&[server.addr]);
    let (callback, rx) = channel();
    for _ in 0..20 {
        resolver.submit("host.example.test", callback());
    }
    resolver.submit("192.0.2.1", callback());
    resolver.run();
    let results = collect(&rx);
    assert_eq!(results.len(), 21);
    assert!(results.iter().all(|res| res.is_ok()));
    // Two questions per host name plus one for the address.
    assert!(server.queries() >= 41);
}

#[test]
fn unanswered_questions_time_out() {
    let server = Server::start();
    let resolver = resolver(&[server.addr]);
    let (callback, rx) = channel();
    let start = Instant::now();
    resolver.submit_with_family("silent.example.test", Family::V4, callback());
    resolver.run();
    assert_eq!(collect(&rx), vec![Err(Failure::Timeout)]);
    // Two attempts at one server.
    assert!(start.elapsed() >= Duration::from_millis(190));
    assert_eq!(server.queries(), 2);
}

#[test]
fn refused_server_is_skipped() {
    let server = Server::start();
    let resolver = resolver(&[closed_port(), server.addr]);
    let (callback, rx) = channel();
    let start = Instant::now();
    resolver.submit_with_family("host.example.test", Family::V4, callback());
    resolver.run();
    assert_eq!(collect(&rx), vec![Ok(vec!["192.0.2.1".to_string()])]);
    // The answer came without waiting for the first server to time out.
    assert!(start.elapsed() < Duration::from_millis(100));
}

#[test]
fn follow_up_from_callback() {
    let server = Server::start();
    let resolver = resolver(&[server.addr]);
    let submitter = resolver.submitter();
    let (callback, rx) = channel();
    let follow_up = callback();
    resolver.submit("192.0.2.1", move |res| {
        let addr: IpAddr = "192.0.2.1".parse().unwrap();
        assert_eq!(res, Ok(vec![addr.to_string()]));
        submitter.submit_with_family(
            "host.example.test",
            Family::V6,
            follow_up,
        );
    });
    resolver.run();
    assert_eq!(collect(&rx), vec![Ok(vec!["2001:db8::1".to_string()])]);
}

#[test]
fn drop_cancels_queued_lookups() {
    let server = Server::start();
    let resolver = resolver(&[server.addr]);
    let (callback, rx) = channel();
    resolver.submit("silent.example.test", callback());
    drop(resolver);
    assert_eq!(collect(&rx), vec![Err(Failure::Cancelled)]);
    assert_eq!(server.queries(), 0);
}

/// A source that hands out one submission and then gives out.
///
/// Its second drain panics which unwinds out of the running loop while the
/// submission is still being worked on.
struct GivingOut {
    drains: AtomicUsize,
    first: Mutex<Option<Submission>>,
}

impl WorkSource for GivingOut {
    fn drain(&self) -> Vec<Submission> {
        if self.drains.fetch_add(1, Ordering::SeqCst) == 0 {
            self.first.lock().take().into_iter().collect()
        } else {
            panic!("source gave out")
        }
    }
}

#[test]
fn drop_cancels_lookups_in_flight() {
    let server = Server::start();
    let resolver = resolver(&[server.addr]);
    let (callback, rx) = channel();
    let state = Arc::new(());
    let source = {
        let state = state.clone();
        let callback = callback();
        GivingOut {
            drains: AtomicUsize::new(0),
            first: Mutex::new(Some(Submission::with_family(
                "late.example.test",
                Family::V4,
                move |res| {
                    drop(state);
                    callback(res)
                },
            ))),
        }
    };

    let res =
        panic::catch_unwind(AssertUnwindSafe(|| resolver.run_with(&source)));
    assert!(res.is_err());
    assert_eq!(resolver.in_progress(), Some(1));
    assert!(server.queries() >= 1);
    assert!(collect(&rx).is_empty());

    drop(resolver);
    assert_eq!(collect(&rx), vec![Err(Failure::Cancelled)]);
    assert_eq!(Arc::strong_count(&state), 1);

    // The answers arriving now go nowhere.
    thread::sleep(LATE_DELAY + Duration::from_millis(200));
    assert!(collect(&rx).is_empty());
}
