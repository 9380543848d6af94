pub mod mock_airtable_server;
pub mod mock_webflow_server;
pub mod test_data;
