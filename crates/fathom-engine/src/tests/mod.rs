mod round_trip;
mod trace_output;
mod validation;
