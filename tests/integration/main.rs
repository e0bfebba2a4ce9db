mod cycle;
mod mock_platform;
