use std::sync::Arc;

use tracing::debug;

use crate::err::RegisterAppError;
use crate::flow::{Flow, ForwardMode};
use crate::framework::AppHelper;

const APP_TAB_BITS: u32 = 4;
const APP_TAB_SIZE: usize = 1 << APP_TAB_BITS;

#[inline]
fn hashkey(port: u16) -> usize {
    usize::from((port >> APP_TAB_BITS) ^ port) & (APP_TAB_SIZE - 1)
}

/// Hash table of application helper incarnations, keyed by service
/// port. At most one helper per port.
pub(crate) struct AppTable {
    buckets: [Vec<Arc<dyn AppHelper>>; APP_TAB_SIZE],
}

impl AppTable {
    pub(crate) fn new() -> AppTable {
        AppTable {
            buckets: std::array::from_fn(|_| Vec::new()),
        }
    }

    /// Registers a helper incarnation; refuses duplicates on the same
    /// port.
    pub(crate) fn register(&mut self, inc: Arc<dyn AppHelper>) -> Result<(), RegisterAppError> {
        let port = inc.port();
        let bucket = &mut self.buckets[hashkey(port)];
        if bucket.iter().any(|existing| existing.port() == port) {
            return Err(RegisterAppError::PortInUse { port });
        }
        bucket.push(inc);
        Ok(())
    }

    /// Removes a helper incarnation again.
    pub(crate) fn unregister(&mut self, inc: &Arc<dyn AppHelper>) {
        let bucket = &mut self.buckets[hashkey(inc.port())];
        bucket.retain(|existing| !Arc::ptr_eq(existing, inc));
    }

    /// Binds the helper registered for the flow's virtual port, if any.
    /// Only NAT flows carry helpers; the binding result is the helper's
    /// `init_conn` outcome.
    pub(crate) fn bind(&self, flow: &mut Flow) -> bool {
        if flow.fwd_mode != ForwardMode::Masq {
            return true;
        }

        let bucket = &self.buckets[hashkey(flow.vport)];
        for inc in bucket {
            if inc.port() == flow.vport {
                debug!(
                    helper = inc.name(),
                    port = flow.vport,
                    "binding helper to flow"
                );
                flow.app = Some(inc.clone());
                return inc.init_conn(flow);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TestHelper {
        port: u16,
        init_ok: bool,
        inits: AtomicUsize,
    }

    impl TestHelper {
        fn new(port: u16) -> Arc<TestHelper> {
            Arc::new(TestHelper {
                port,
                init_ok: true,
                inits: AtomicUsize::new(0),
            })
        }
    }

    impl AppHelper for TestHelper {
        fn name(&self) -> &str {
            "test"
        }

        fn port(&self) -> u16 {
            self.port
        }

        fn init_conn(&self, _flow: &mut Flow) -> bool {
            self.inits.fetch_add(1, Ordering::Relaxed);
            self.init_ok
        }
    }

    fn flow(mode: ForwardMode, vport: u16) -> Flow {
        Flow::new(
            mode,
            IpAddr::from([1, 1, 1, 1]),
            5000,
            IpAddr::from([10, 0, 0, 1]),
            vport,
            IpAddr::from([10, 0, 2, 1]),
            40000,
            IpAddr::from([10, 0, 1, 1]),
            vport,
        )
    }

    #[test]
    fn hash_is_confined_to_table() {
        for port in [0u16, 21, 0xffff, 0x1234] {
            assert!(hashkey(port) < APP_TAB_SIZE);
        }
        // ports differing only above the bucket bits share a bucket
        assert_eq!(hashkey(0x0015), hashkey(0x1015 ^ 0x0100));
    }

    #[test]
    fn register_refuses_duplicate_port() {
        let mut table = AppTable::new();
        table.register(TestHelper::new(21)).unwrap();
        assert_eq!(
            Err(RegisterAppError::PortInUse { port: 21 }),
            table.register(TestHelper::new(21))
        );
        // a different port in the same bucket is fine
        table.register(TestHelper::new(21 ^ (1 << 8))).unwrap();
    }

    #[test]
    fn unregister_releases_the_port() {
        let mut table = AppTable::new();
        let helper = TestHelper::new(21);
        table.register(helper.clone()).unwrap();
        let dyn_helper: Arc<dyn AppHelper> = helper;
        table.unregister(&dyn_helper);
        table.register(TestHelper::new(21)).unwrap();
    }

    #[test]
    fn bind_only_for_nat() {
        let mut table = AppTable::new();
        let helper = TestHelper::new(80);
        table.register(helper.clone()).unwrap();

        let mut fnat = flow(ForwardMode::FullNat, 80);
        assert!(table.bind(&mut fnat));
        assert!(fnat.app.is_none());

        let mut nat = flow(ForwardMode::Masq, 80);
        assert!(table.bind(&mut nat));
        assert!(nat.app.is_some());
        assert_eq!(1, helper.inits.load(Ordering::Relaxed));
    }

    #[test]
    fn bind_without_helper_succeeds_unbound() {
        let table = AppTable::new();
        let mut nat = flow(ForwardMode::Masq, 80);
        assert!(table.bind(&mut nat));
        assert!(nat.app.is_none());
    }

    #[test]
    fn bind_reports_init_failure() {
        let mut table = AppTable::new();
        let helper = Arc::new(TestHelper {
            port: 80,
            init_ok: false,
            inits: AtomicUsize::new(0),
        });
        table.register(helper).unwrap();
        let mut nat = flow(ForwardMode::Masq, 80);
        assert!(!table.bind(&mut nat));
    }
}
