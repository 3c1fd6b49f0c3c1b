mod rtu;
mod tcp;

pub use rtu::{
    chunk_reads, expected_response_len, generate_read_holdings_request,
    parse_read_holdings_response, MAX_READ_COUNT,
};
pub use tcp::{
    build_exception, build_read_response, respond, MbapHeader, EXCEPTION_ILLEGAL_DATA_ADDRESS,
    EXCEPTION_ILLEGAL_DATA_VALUE, EXCEPTION_ILLEGAL_FUNCTION, MBAP_HEADER_LEN,
    READ_HOLDING_REGISTERS, READ_INPUT_REGISTERS,
};
