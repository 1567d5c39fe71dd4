pub mod clock;
pub mod error;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{GatewayError, Result, SyncError};
pub use types::{
    Expense, ExpenseCategory, ExpenseSource, MonthData, NewExpense, Provenance, ReceiptProvider,
    month_key_from_date, new_record_id, validate_month_key,
};
