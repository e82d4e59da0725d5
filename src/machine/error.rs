//! Rejection taxonomy for command handling.
//!
//! Every rejection leaves credit, stock, selection, and state untouched;
//! the caller may retry with a valid request.

use thiserror::Error;

use crate::model::{Credit, MachineState, ProductId};

/// Why a parsed command was rejected by the state machine.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("selection rejected: product {0} is sold out")]
    SoldOut(ProductId),

    #[error("confirm rejected: machine is {0:?}")]
    ConfirmWrongState(MachineState),

    #[error("confirm rejected: credit {credit} is below price {price}")]
    InsufficientCredit { credit: Credit, price: Credit },

    #[error("cancel rejected: machine is {0:?}")]
    CancelWrongState(MachineState),

    #[error("cancel rejected: no credit to refund")]
    NothingToRefund,
}
