//! Request/response pairing and response dispatch.
//!
//! Requests and responses travel the bus strictly in order: every unicast
//! request is appended to a [`RequestLedger`], and the response dispatcher
//! pops the ledger as replies come back. Any reordering, loss or surplus
//! surfaces as an error instead of silently mis-attributing data.
//!
//! [`ResponseRouter`] holds the per-function-code parsing actions. Actions
//! receive a context (buffer + ledger + whatever state the façade carries)
//! and are responsible for reading the payload, checking the CRC and
//! dispatching to application hooks.

use std::collections::{HashMap, VecDeque};

use tracing::{debug, trace};

use crate::buffer::FifoBuffer;
use crate::constants::is_unicast_address;
use crate::error::{IlcError, IlcResult};
use crate::framing::Framing;

/// FIFO of outstanding (address, function) pairs awaiting replies.
#[derive(Debug, Clone, Default)]
pub struct RequestLedger {
    commanded: VecDeque<(u8, u8)>,
}

impl RequestLedger {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an issued request. Broadcast addresses never reply, so only
    /// unicast requests are entered.
    pub fn push_commanded(&mut self, address: u8, function: u8) {
        if is_unicast_address(address) {
            self.commanded.push_back((address, function));
        }
    }

    /// Match a received response against the oldest outstanding request.
    ///
    /// For an error response, `function` must be the originally called
    /// function - the ledger stores what was requested, not the error alias.
    pub fn check_commanded(&mut self, address: u8, function: u8) -> IlcResult<()> {
        let (expected_address, expected_function) = match self.commanded.pop_front() {
            Some(pair) => pair,
            None => return Err(IlcError::UnmatchedFunction { address, function }),
        };
        if expected_address != address || expected_function != function {
            return Err(IlcError::UnexpectedResponse {
                address,
                function,
                expected_address,
                expected_function,
            });
        }
        Ok(())
    }

    /// Verify no replies remain outstanding after a response batch.
    pub fn check_empty(&mut self) -> IlcResult<()> {
        if self.commanded.is_empty() {
            return Ok(());
        }
        let pairs = self.commanded.drain(..).collect();
        Err(IlcError::OutstandingRequests { pairs })
    }

    /// Forget every outstanding request.
    pub fn clear(&mut self) {
        self.commanded.clear();
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.commanded.len()
    }

    /// True when no replies are expected.
    pub fn is_empty(&self) -> bool {
        self.commanded.is_empty()
    }
}

/// State a [`ResponseRouter`] operates on while walking a response buffer.
pub trait ResponseContext {
    /// Framing used by the context's buffer.
    type Framing: Framing;

    /// Buffer holding the response words being parsed.
    fn buffer_mut(&mut self) -> &mut FifoBuffer<Self::Framing>;

    /// Ledger of outstanding requests.
    fn ledger_mut(&mut self) -> &mut RequestLedger;

    /// Called before any response in a batch is parsed.
    fn pre_process(&mut self) -> IlcResult<()> {
        Ok(())
    }

    /// Called after the whole batch parsed cleanly.
    fn post_process(&mut self) -> IlcResult<()> {
        Ok(())
    }
}

/// Parsing action for one function code. Receives the context and the
/// responding address after the two header bytes have been consumed; must
/// read the remaining payload and call `check_crc`.
pub type ResponseAction<C> = Box<dyn FnMut(&mut C, u8) -> IlcResult<()> + Send>;

/// What to do with a Modbus error response.
pub enum ErrorAction<C> {
    /// Raise [`IlcError::IlcException`] with the received exception code.
    Default,
    /// Invoke a custom handler with (context, address, exception code).
    Custom(Box<dyn FnMut(&mut C, u8, u8) -> IlcResult<()> + Send>),
}

struct ErrorEntry<C> {
    /// Function originally requested - what the ledger was told.
    request_function: u8,
    action: ErrorAction<C>,
}

/// Function-code-keyed dispatch table for response parsing.
pub struct ResponseRouter<C> {
    actions: HashMap<u8, ResponseAction<C>>,
    error_actions: HashMap<u8, ErrorEntry<C>>,
}

impl<C> Default for ResponseRouter<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> ResponseRouter<C> {
    /// Empty router.
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
            error_actions: HashMap::new(),
        }
    }

    /// Register a function code with its parsing action and the matching
    /// error response code. Error responses raise the standard exception.
    pub fn add_response(&mut self, function: u8, action: ResponseAction<C>, error_response: u8) {
        self.add_response_with_error(function, action, error_response, ErrorAction::Default);
    }

    /// Register a function code with a custom error-response handler.
    pub fn add_response_with_error(
        &mut self,
        function: u8,
        action: ResponseAction<C>,
        error_response: u8,
        error_action: ErrorAction<C>,
    ) {
        self.actions.insert(function, action);
        self.error_actions.insert(
            error_response,
            ErrorEntry {
                request_function: function,
                action: error_action,
            },
        );
    }
}

impl<C: ResponseContext> ResponseRouter<C> {
    /// Walk a received FIFO snapshot, dispatching every response in it.
    ///
    /// For each frame: read the (address, function) header, match it
    /// against the ledger (error codes count as their request function),
    /// then hand off to the registered action. Unknown function codes are
    /// fatal for the batch - frame boundaries can't be recovered.
    pub fn process(&mut self, ctx: &mut C, response: &[u16]) -> IlcResult<()> {
        ctx.pre_process()?;

        ctx.buffer_mut().set_buffer(response);

        while !ctx.buffer_mut().end_of_buffer() {
            let address = ctx.buffer_mut().read::<u8>()?;
            let function = ctx.buffer_mut().read::<u8>()?;
            trace!(address, function, "dispatching response");

            // Either a function response was received, or an error
            // response; the ledger always holds the requested function.
            let request_function = match self.error_actions.get(&function) {
                Some(entry) => entry.request_function,
                None => function,
            };
            ctx.ledger_mut().check_commanded(address, request_function)?;

            if let Some(action) = self.actions.get_mut(&function) {
                action(ctx, address)?;
            } else if let Some(entry) = self.error_actions.get_mut(&function) {
                let exception = ctx.buffer_mut().read::<u8>()?;
                ctx.buffer_mut().check_crc()?;
                debug!(address, function, exception, "ILC error response");
                match &mut entry.action {
                    ErrorAction::Default => {
                        return Err(IlcError::IlcException {
                            address,
                            function,
                            code: exception,
                        })
                    }
                    ErrorAction::Custom(handler) => handler(ctx, address, exception)?,
                }
            } else {
                return Err(IlcError::UnknownResponse { address, function });
            }
        }

        ctx.post_process()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::IlcFraming;

    #[test]
    fn test_ledger_orders_responses() {
        let mut ledger = RequestLedger::new();
        ledger.push_commanded(8, 18);
        ledger.push_commanded(9, 18);

        ledger.check_commanded(8, 18).unwrap();
        ledger.check_commanded(9, 18).unwrap();
        ledger.check_empty().unwrap();
    }

    #[test]
    fn test_ledger_rejects_out_of_order() {
        let mut ledger = RequestLedger::new();
        ledger.push_commanded(8, 18);
        ledger.push_commanded(9, 18);

        let err = ledger.check_commanded(9, 18).unwrap_err();
        assert_eq!(
            err,
            IlcError::UnexpectedResponse {
                address: 9,
                function: 18,
                expected_address: 8,
                expected_function: 18,
            }
        );
    }

    #[test]
    fn test_ledger_rejects_unrequested() {
        let mut ledger = RequestLedger::new();
        let err = ledger.check_commanded(5, 17).unwrap_err();
        assert_eq!(
            err,
            IlcError::UnmatchedFunction {
                address: 5,
                function: 17,
            }
        );
    }

    #[test]
    fn test_ledger_skips_broadcasts() {
        let mut ledger = RequestLedger::new();
        for address in [0u8, 148, 149, 250] {
            ledger.push_commanded(address, 65);
        }
        assert!(ledger.is_empty());

        ledger.push_commanded(255, 72);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_ledger_check_empty_lists_outstanding() {
        let mut ledger = RequestLedger::new();
        ledger.push_commanded(3, 17);
        ledger.push_commanded(4, 18);

        let err = ledger.check_empty().unwrap_err();
        assert_eq!(
            err,
            IlcError::OutstandingRequests {
                pairs: vec![(3, 17), (4, 18)],
            }
        );
        // draining happened - the next check passes
        ledger.check_empty().unwrap();
    }

    // Minimal context: a buffer, a ledger and a log of dispatched calls.
    #[derive(Default)]
    struct TestContext {
        buffer: FifoBuffer,
        ledger: RequestLedger,
        parsed: Vec<(u8, u16)>,
        errors: Vec<(u8, u8)>,
        pre: usize,
        post: usize,
    }

    impl ResponseContext for TestContext {
        type Framing = IlcFraming;

        fn buffer_mut(&mut self) -> &mut FifoBuffer {
            &mut self.buffer
        }

        fn ledger_mut(&mut self) -> &mut RequestLedger {
            &mut self.ledger
        }

        fn pre_process(&mut self) -> IlcResult<()> {
            self.pre += 1;
            Ok(())
        }

        fn post_process(&mut self) -> IlcResult<()> {
            self.post += 1;
            Ok(())
        }
    }

    fn value_router() -> ResponseRouter<TestContext> {
        let mut router = ResponseRouter::new();
        router.add_response(
            42,
            Box::new(|ctx: &mut TestContext, address| {
                let value = ctx.buffer.read::<u16>()?;
                ctx.buffer.check_crc()?;
                ctx.parsed.push((address, value));
                Ok(())
            }),
            42 | 0x80,
        );
        router
    }

    fn encode_value_response(address: u8, value: u16) -> Vec<u16> {
        let mut response = FifoBuffer::new();
        response.write::<u8>(address);
        response.write::<u8>(42);
        response.write::<u16>(value);
        response.write_crc();
        response.words().to_vec()
    }

    #[test]
    fn test_router_dispatches_and_runs_hooks() {
        let mut router = value_router();
        let mut ctx = TestContext::default();
        ctx.ledger.push_commanded(7, 42);
        ctx.ledger.push_commanded(8, 42);

        let mut words = encode_value_response(7, 100);
        words.extend(encode_value_response(8, 200));

        router.process(&mut ctx, &words).unwrap();
        assert_eq!(ctx.parsed, vec![(7, 100), (8, 200)]);
        assert_eq!(ctx.pre, 1);
        assert_eq!(ctx.post, 1);
        ctx.ledger.check_empty().unwrap();
    }

    #[test]
    fn test_router_default_error_action() {
        let mut router = value_router();
        let mut ctx = TestContext::default();
        ctx.ledger.push_commanded(7, 42);

        let mut response = FifoBuffer::new();
        response.write::<u8>(7);
        response.write::<u8>(42 | 0x80);
        response.write::<u8>(3); // exception code
        response.write_crc();

        let err = router
            .process(&mut ctx, &response.words().to_vec())
            .unwrap_err();
        assert_eq!(
            err,
            IlcError::IlcException {
                address: 7,
                function: 42 | 0x80,
                code: 3,
            }
        );
    }

    #[test]
    fn test_router_custom_error_action() {
        let mut router = ResponseRouter::new();
        router.add_response_with_error(
            42,
            Box::new(|ctx: &mut TestContext, address| {
                let value = ctx.buffer.read::<u16>()?;
                ctx.buffer.check_crc()?;
                ctx.parsed.push((address, value));
                Ok(())
            }),
            42 | 0x80,
            ErrorAction::Custom(Box::new(|ctx: &mut TestContext, address, exception| {
                ctx.errors.push((address, exception));
                Ok(())
            })),
        );

        let mut ctx = TestContext::default();
        ctx.ledger.push_commanded(7, 42);

        let mut response = FifoBuffer::new();
        response.write::<u8>(7);
        response.write::<u8>(42 | 0x80);
        response.write::<u8>(2);
        response.write_crc();

        router.process(&mut ctx, &response.words().to_vec()).unwrap();
        assert_eq!(ctx.errors, vec![(7, 2)]);
        assert!(ctx.parsed.is_empty());
    }

    #[test]
    fn test_router_unknown_function() {
        let mut router = value_router();
        let mut ctx = TestContext::default();
        ctx.ledger.push_commanded(7, 99);

        let mut response = FifoBuffer::new();
        response.write::<u8>(7);
        response.write::<u8>(99);
        response.write_crc();

        let err = router
            .process(&mut ctx, &response.words().to_vec())
            .unwrap_err();
        assert_eq!(
            err,
            IlcError::UnknownResponse {
                address: 7,
                function: 99,
            }
        );
    }

    #[test]
    fn test_router_error_alias_matches_request_function() {
        // the ledger holds the requested function; the error response code
        // must resolve back to it before the order check
        let mut router = value_router();
        let mut ctx = TestContext::default();
        ctx.ledger.push_commanded(7, 42);

        let mut response = FifoBuffer::new();
        response.write::<u8>(7);
        response.write::<u8>(42 | 0x80);
        response.write::<u8>(1);
        response.write_crc();

        let err = router
            .process(&mut ctx, &response.words().to_vec())
            .unwrap_err();
        // the ledger matched (no UnmatchedFunction) - the default error
        // action raised the exception instead
        assert!(matches!(err, IlcError::IlcException { .. }));
        ctx.ledger.check_empty().unwrap();
    }
}
