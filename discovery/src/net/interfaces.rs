use std::fmt::{Display, Formatter};
use std::net::Ipv4Addr;

/// A local interface that can send and receive IPv4 multicast.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Interface {
    pub name: String,
    pub addr: Ipv4Addr,
}

impl Display for Interface {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.addr)
    }
}

/// One address entry as reported by the operating system.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct InterfaceEntry {
    pub name: String,
    pub addr: Option<Ipv4Addr>,
    pub up: bool,
    pub loopback: bool,
    pub multicast: bool,
}

impl InterfaceEntry {
    fn qualifies(&self) -> bool {
        self.up && self.multicast && !self.loopback && self.addr.is_some()
    }
}

/// Reduces raw entries to qualifying interfaces, one per interface name.
///
/// The first IPv4 address reported for an interface is the one used for
/// multicast membership and as the outgoing multicast interface.
pub fn qualifying(entries: impl IntoIterator<Item = InterfaceEntry>) -> Vec<Interface> {
    let mut out: Vec<Interface> = Vec::new();

    for entry in entries {
        if !entry.qualifies() {
            continue;
        }

        if out.iter().any(|i| i.name == entry.name) {
            continue;
        }

        if let Some(addr) = entry.addr {
            out.push(Interface {
                name: entry.name,
                addr,
            });
        }
    }

    out
}

/// Lists the interfaces that are up, not loopback and multicast capable.
pub fn qualifying_interfaces() -> Result<Vec<Interface>, std::io::Error> {
    let interfaces = qualifying(platform::interface_entries()?);
    tracing::trace!("Qualifying interfaces: {:?}", interfaces);
    Ok(interfaces)
}

/// Result of running an operation on every interface.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct Outcome {
    pub attempted: usize,
    pub failed: usize,
}

impl Outcome {
    pub fn succeeded(&self) -> usize {
        self.attempted - self.failed
    }

    /// Counts one attempt on `interface`, logging it if it failed.
    pub fn record(&mut self, interface: &Interface, what: &str, result: Result<(), std::io::Error>) {
        self.attempted += 1;

        if let Err(err) = result {
            self.failed += 1;
            tracing::warn!("Failed to {} on {}: {}", what, interface, err);
        }
    }
}

/// Runs `callback` once per interface.
///
/// A failure is logged and does not stop the remaining interfaces from being
/// visited.
pub fn for_each<F>(interfaces: &[Interface], what: &str, mut callback: F) -> Outcome
where
    F: FnMut(&Interface) -> Result<(), std::io::Error>,
{
    let mut outcome = Outcome::default();

    for interface in interfaces {
        outcome.record(interface, what, callback(interface));
    }

    outcome
}

#[cfg(unix)]
mod platform {
    use super::InterfaceEntry;
    use std::ffi::CStr;
    use std::net::Ipv4Addr;

    pub fn interface_entries() -> Result<Vec<InterfaceEntry>, std::io::Error> {
        let mut addresses = std::ptr::null_mut();
        if unsafe { libc::getifaddrs(&mut addresses) } == -1 {
            // Failed to get the addresses
            return Err(std::io::Error::last_os_error());
        }

        let mut out = Vec::new();

        let mut next = addresses;
        while !next.is_null() {
            let current = unsafe { &*next };
            next = current.ifa_next;

            let name = if current.ifa_name.is_null() {
                String::new()
            } else {
                unsafe { CStr::from_ptr(current.ifa_name) }
                    .to_string_lossy()
                    .into_owned()
            };

            let flags = current.ifa_flags;
            let addr = if current.ifa_addr.is_null() {
                None
            } else {
                let family = unsafe { (*current.ifa_addr).sa_family } as libc::c_int;
                match family {
                    libc::AF_INET => {
                        let address =
                            unsafe { &*(current.ifa_addr as *const libc::sockaddr_in) };
                        Some(Ipv4Addr::from(address.sin_addr.s_addr.to_ne_bytes()))
                    }

                    // IPv6 and link layer entries are of no use for IPv4 groups
                    _ => None,
                }
            };

            out.push(InterfaceEntry {
                name,
                addr,
                up: flags & libc::IFF_UP as libc::c_uint != 0,
                loopback: flags & libc::IFF_LOOPBACK as libc::c_uint != 0,
                multicast: flags & libc::IFF_MULTICAST as libc::c_uint != 0,
            });
        }

        unsafe { libc::freeifaddrs(addresses) };

        Ok(out)
    }
}

#[cfg(not(unix))]
mod platform {
    use super::InterfaceEntry;

    pub fn interface_entries() -> Result<Vec<InterfaceEntry>, std::io::Error> {
        // No flags are available here, every listed address is assumed to be
        // up and multicast capable
        Ok(get_if_addrs::get_if_addrs()?
            .into_iter()
            .map(|iface| {
                let loopback = iface.is_loopback();
                let addr = match iface.addr {
                    get_if_addrs::IfAddr::V4(v4) => Some(v4.ip),
                    get_if_addrs::IfAddr::V6(_) => None,
                };

                InterfaceEntry {
                    name: iface.name,
                    addr,
                    up: true,
                    loopback,
                    multicast: true,
                }
            })
            .collect())
    }
}
