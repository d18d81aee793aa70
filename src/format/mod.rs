//! Instrument export format (EC-Lab style ASCII)
//!
//! ```text
//! EC-Lab ASCII FILE
//! Nb header lines : 11           <- total header lines, column row included
//!
//! Ns  ctrl_type  charge/discharge  ctrl1_val  ctrl1_val_unit  lim1
//! 0   Rest       -                                            t > 60 s
//! 1   PEIS       -                 0          V
//! 2   CC         Charge            100        mA              Ewe > 4.2 V
//! 3   CC         Discharge         -50        mA              Ewe < 3.0 V
//! 4   Loop       -
//!
//! cycle number  Ns  time/s  Ewe/V  I/mA  (Q-Qo)/mA.h  freq/Hz  Re(Z)/Ohm  -Im(Z)/Ohm
//! ```
//!
//! Fields are tab separated. The header is consumed once; the body is streamed
//! row by row in file order.

mod header;
mod reader;
pub mod schema;

pub use header::ExportHeader;
pub use reader::ExportReader;
pub use schema::ColumnMap;
