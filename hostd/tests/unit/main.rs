mod common;
mod test_http;
mod test_pipeline;
mod test_proxy;
