//! Status codes exchanged across the plugin boundary.
//!
//! Zero is success, negative values are host/OS failures and positive values
//! belong to the plugin (it has already told the user about the problem).

use crate::types::OSErr;

pub const NO_ERR: OSErr = 0;
pub const READ_ERR: OSErr = -19;
pub const WRIT_ERR: OSErr = -20;
pub const OPEN_ERR: OSErr = -23;
pub const DSK_FUL_ERR: OSErr = -34;
pub const IO_ERR: OSErr = -36;
pub const EOF_ERR: OSErr = -39;
pub const FNF_ERR: OSErr = -43;
pub const V_LCKD_ERR: OSErr = -46;
pub const F_LCKD_ERR: OSErr = -45;
pub const PARAM_ERR: OSErr = -50;
pub const MEM_FULL_ERR: OSErr = -108;
pub const NIL_HANDLE_ERR: OSErr = -109;
pub const USER_CANCELED_ERR: OSErr = -128;

pub const FILTER_BAD_PARAMETERS: OSErr = -30100;
pub const FILTER_BAD_MODE: OSErr = -30101;

pub const ERR_PLUG_IN_HOST_INSUFFICIENT: OSErr = -30900;
pub const ERR_PLUG_IN_PROPERTY_UNDEFINED: OSErr = -30901;
pub const ERR_HOST_DOES_NOT_SUPPORT_COL_STEP: OSErr = -30902;
pub const ERR_INVALID_SAMPLE_POINT: OSErr = -30903;
pub const ERR_REPORT_STRING: OSErr = -30904;
pub const ERR_UNKNOWN_PORT: OSErr = -30910;
pub const ERR_UNSUPPORTED_ROW_BITS: OSErr = -30911;
pub const ERR_UNSUPPORTED_COL_BITS: OSErr = -30912;
pub const ERR_UNSUPPORTED_BIT_OFFSET: OSErr = -30913;
pub const ERR_UNSUPPORTED_DEPTH: OSErr = -30914;
pub const ERR_UNSUPPORTED_DEPTH_CONVERSION: OSErr = -30915;

/// PICA status code.
pub type SPErr = i32;

pub const K_SP_NO_ERROR: SPErr = 0;
pub const K_SP_SUITE_NOT_FOUND_ERROR: SPErr = crate::types::four_cc(b"S!Fd") as SPErr;
pub const K_SP_BAD_PARAMETER_ERROR: SPErr = crate::types::four_cc(b"Parm") as SPErr;
pub const K_SP_UNIMPLEMENTED_ERROR: SPErr = crate::types::four_cc(b"!IMP") as SPErr;
pub const K_SP_OUT_OF_MEMORY_ERROR: SPErr = -108;
